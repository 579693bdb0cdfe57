//! Structured events emitted by the regulator.
//!
//! Events flow into a [`TelemetrySink`], which is just a `tower::Service<RegulatorEvent>`.
//! Emission is best-effort: a sink that is not ready or that errors loses the event, and the
//! request being regulated never notices.
//!
//! ```rust
//! use tollgate::telemetry::{MemorySink, RegulatorEvent};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(RegulatorEvent::Queued { queue_length: 1 }).await.unwrap();
//! assert_eq!(sink.events(), vec![RegulatorEvent::Queued { queue_length: 1 }]);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes regulator events.
pub trait TelemetrySink:
    tower::Service<RegulatorEvent, Response = (), Error = Self::SinkError, Future = Self::SinkFuture>
    + Clone
    + Send
    + Sync
    + 'static
{
    type SinkError: std::error::Error + Send + 'static;
    type SinkFuture: std::future::Future<Output = Result<(), Self::SinkError>> + Send + 'static;
}

/// Deliver `event` if the sink is ready; errors are swallowed.
pub async fn emit_best_effort<S>(sink: S, event: RegulatorEvent)
where
    S: tower::Service<RegulatorEvent, Response = ()> + Send + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Everything observable about a regulated call's path through the regulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegulatorEvent {
    /// The target was not regulated (or regulation is disabled).
    Bypassed,
    /// A token was available; the request runs immediately.
    Admitted { tokens_remaining: u32 },
    /// No token; the request waits in the queue.
    Queued { queue_length: usize },
    /// The queue was full; the caller got a backpressure error.
    Rejected { queue_length: usize, max: usize },
    /// A refill tick released queued requests.
    Released { count: usize, tokens_remaining: u32 },
    /// A transient failure is about to be retried after `delay`.
    RetryAttempt { attempt: u32, delay: Duration, status: Option<u16> },
    /// Retries ran out; the last outcome goes back to the caller.
    RetryExhausted { attempts: u32, status: Option<u16> },
    /// Throttled notice that the queue is at or above the log threshold.
    QueueSaturated { queue_length: usize, tokens_available: u32 },
}

impl fmt::Display for RegulatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegulatorEvent::Bypassed => write!(f, "Bypassed"),
            RegulatorEvent::Admitted { tokens_remaining } => {
                write!(f, "Admitted(tokens={})", tokens_remaining)
            }
            RegulatorEvent::Queued { queue_length } => write!(f, "Queued(len={})", queue_length),
            RegulatorEvent::Rejected { queue_length, max } => {
                write!(f, "Rejected({}/{})", queue_length, max)
            }
            RegulatorEvent::Released { count, tokens_remaining } => {
                write!(f, "Released(count={}, tokens={})", count, tokens_remaining)
            }
            RegulatorEvent::RetryAttempt { attempt, delay, status } => match status {
                Some(s) => write!(f, "RetryAttempt(#{}, delay={:?}, status={})", attempt, delay, s),
                None => write!(f, "RetryAttempt(#{}, delay={:?}, transport)", attempt, delay),
            },
            RegulatorEvent::RetryExhausted { attempts, status } => match status {
                Some(s) => write!(f, "RetryExhausted(attempts={}, status={})", attempts, s),
                None => write!(f, "RetryExhausted(attempts={}, transport)", attempts),
            },
            RegulatorEvent::QueueSaturated { queue_length, tokens_available } => {
                write!(f, "QueueSaturated(len={}, tokens={})", queue_length, tokens_available)
            }
        }
    }
}

type SinkFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// Discards all events. The regulator's default.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<RegulatorEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: RegulatorEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}

/// Logs every event through `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<RegulatorEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RegulatorEvent) -> Self::Future {
        tracing::info!(event = %event, "regulator_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}

/// Bounded in-memory sink; oldest events are evicted first. Clones share storage.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RegulatorEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Default cap: 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the stored events.
    pub fn events(&self) -> Vec<RegulatorEvent> {
        self.lock().clone()
    }

    /// Stored events matching `pred`.
    pub fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&RegulatorEvent) -> bool,
    {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RegulatorEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<RegulatorEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RegulatorEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}

/// Broadcasts events to any number of subscribers. Slow subscribers lag and miss events.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: tokio::sync::broadcast::Sender<RegulatorEvent>,
    dropped: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RegulatorEvent> {
        self.sender.subscribe()
    }

    /// Events sent while nobody was subscribed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Service<RegulatorEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RegulatorEvent) -> Self::Future {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
    type SinkFuture = SinkFuture;
}
