//! Admission scheduler: the single entry point for regulated upstream calls.
//!
//! Path of one call through [`Regulator::execute`]:
//!
//! ```text
//! Arrived ─► classified ─┬─ unregulated ─► Bypassed (runs now, no token, no queue)
//!                        └─ regulated ─┬─ token ─────► Admitted ─┐
//!                                      ├─ no token ──► Queued ───┤ (released by a refill tick)
//!                                      └─ queue full ► Rejected  ▼
//!                                                            Running (retry/backoff) ─► Resolved
//! ```
//!
//! Bucket and queue live behind one mutex owned by the regulator; nothing else can touch them.
//! A single background driver (started lazily, idempotently) refills the bucket every tick and
//! releases queued callers in arrival order through one-shot channels. Each caller then runs its
//! own attempts, so the driver never executes user code. The driver dies with the runtime that
//! spawned it; the next regulated call (or `start`) notices and spawns a fresh one.
//!
//! Clones of a `Regulator` share all state, including the driver.

use crate::bucket::TokenBucket;
use crate::classifier::Target;
use crate::clock::{Clock, MonotonicClock};
use crate::config::RegulatorConfig;
use crate::error::RegulatorError;
use crate::layer::RegulatorLayer;
use crate::metrics::{MetricsSnapshot, RegulatorMetrics};
use crate::queue::{Pending, WaitQueue};
use crate::retry::{RetryPolicy, RetryPolicyBuilder, UpstreamResponse};
use crate::sleeper::Sleeper;
use crate::telemetry::{emit_best_effort, NullSink, RegulatorEvent, TelemetrySink};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Continuation parked in the wait queue; fired once when a tick releases it.
type Release = oneshot::Sender<()>;

#[derive(Debug)]
struct State {
    bucket: TokenBucket,
    queue: WaitQueue<Release>,
}

struct Inner<S> {
    config: RegulatorConfig,
    state: Mutex<State>,
    metrics: RegulatorMetrics,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    sink: S,
    driver: Mutex<Option<AbortHandle>>,
}

impl<S> Inner<S> {
    fn lock_driver(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn driver_alive(&self) -> bool {
        self.lock_driver().as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let driver = self.driver.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = driver.take() {
            handle.abort();
        }
    }
}

enum Admission {
    Admitted { tokens_remaining: u32 },
    Queued { ticket: oneshot::Receiver<()>, queue_length: usize, notice: Option<u32> },
    Rejected { queued: usize, max: usize },
}

/// Client-side admission control for one throttled upstream.
pub struct Regulator<S = NullSink> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Regulator<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S> std::fmt::Debug for Regulator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Regulator")
            .field("config", &self.inner.config)
            .field("started", &self.inner.driver_alive())
            .finish_non_exhaustive()
    }
}

impl Regulator<NullSink> {
    /// Regulator without telemetry, real clock and tokio sleeps.
    pub fn new(config: RegulatorConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: RegulatorConfig) -> RegulatorBuilder<NullSink> {
        RegulatorBuilder::new(config)
    }
}

impl<S> Regulator<S>
where
    S: TelemetrySink,
{
    pub fn config(&self) -> &RegulatorConfig {
        &self.inner.config
    }

    /// Whether calls to `target` are subject to admission control right now.
    pub fn is_regulated(&self, target: &Target) -> bool {
        self.inner.config.enabled() && self.inner.config.classifier().is_regulated(target)
    }

    /// Run one logical upstream call under admission control.
    ///
    /// `operation` performs exactly one attempt and may be invoked again by the retry controller.
    /// Unregulated targets run `operation` once, immediately, with no retry.
    ///
    /// # Errors
    /// - [`RegulatorError::QueueFull`] when no token is free and the queue is at capacity.
    /// - [`RegulatorError::Transport`] with the last transport error once retries are exhausted.
    pub async fn execute<R, E, Fut, Op>(
        &self,
        target: &Target,
        mut operation: Op,
    ) -> Result<R, RegulatorError<E>>
    where
        R: UpstreamResponse + Send,
        E: Send,
        Fut: Future<Output = Result<R, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if !self.is_regulated(target) {
            self.inner.metrics.record_bypassed();
            self.inner.emit(RegulatorEvent::Bypassed).await;
            return operation().await.map_err(RegulatorError::Transport);
        }

        self.start();

        loop {
            match self.inner.admit() {
                Admission::Admitted { tokens_remaining } => {
                    tracing::debug!(host = target.host(), tokens_remaining, "admitted");
                    self.inner.emit(RegulatorEvent::Admitted { tokens_remaining }).await;
                    break;
                }
                Admission::Queued { ticket, queue_length, notice } => {
                    tracing::debug!(host = target.host(), queue_length, "queued");
                    self.inner.emit(RegulatorEvent::Queued { queue_length }).await;
                    if let Some(tokens_available) = notice {
                        self.inner.notice_saturation(queue_length, tokens_available).await;
                    }
                    if ticket.await.is_ok() {
                        break;
                    }
                    // Entry dropped without a release: queue again at the back.
                    tracing::debug!(host = target.host(), "release lost, re-admitting");
                }
                Admission::Rejected { queued, max } => {
                    tracing::warn!(host = target.host(), queued, max, "queue full, rejecting");
                    self.inner.emit(RegulatorEvent::Rejected { queue_length: queued, max }).await;
                    return Err(RegulatorError::QueueFull { queued, max });
                }
            }
        }

        self.inner
            .retry
            .run_with_sink(operation, &self.inner.sink)
            .await
            .map_err(RegulatorError::Transport)
    }

    /// Launch the refill driver if none is running.
    ///
    /// Returns `true` only for the call that actually launched it; while that driver lives,
    /// later calls (from any clone) are no-ops. A driver whose runtime has shut down counts as
    /// not running and is replaced on the current runtime. Outside a tokio runtime nothing is
    /// started and the next regulated call tries again.
    pub fn start(&self) -> bool {
        let mut driver = self.inner.lock_driver();
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; refill driver start deferred");
            return false;
        };
        if driver.is_some() {
            tracing::warn!("refill driver exited; restarting");
        }

        let period = self.inner.config.tick_interval();
        let task = runtime.spawn(drive(Arc::downgrade(&self.inner), period));
        *driver = Some(task.abort_handle());
        tracing::info!(?period, "refill driver started");
        true
    }

    /// Whether a refill driver is currently alive.
    pub fn is_started(&self) -> bool {
        self.inner.driver_alive()
    }

    /// Tower layer routing a service's calls through this regulator. Starts the driver.
    pub fn install(&self) -> RegulatorLayer<S> {
        self.start();
        RegulatorLayer::new(self.clone())
    }

    /// Counters plus current queue length and free tokens.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.inner.metrics.snapshot();
        let state = self.inner.lock_state();
        snapshot.queue_length = state.queue.len();
        snapshot.tokens_available = state.bucket.available();
        snapshot
    }
}

impl<S> Inner<S>
where
    S: TelemetrySink,
{
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue length at which the saturation notice fires; never below one waiter.
    fn saturation_threshold(&self) -> usize {
        self.config.log_threshold().max(1)
    }

    async fn emit(&self, event: RegulatorEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }

    async fn notice_saturation(&self, queue_length: usize, tokens_available: u32) {
        tracing::warn!(queue_length, tokens_available, "regulator queue saturated");
        self.emit(RegulatorEvent::QueueSaturated { queue_length, tokens_available }).await;
    }

    fn admit(&self) -> Admission {
        let mut state = self.lock_state();
        if state.bucket.try_acquire() {
            self.metrics.record_admitted();
            return Admission::Admitted { tokens_remaining: state.bucket.available() };
        }

        let (release, ticket) = oneshot::channel();
        match state.queue.enqueue(release) {
            Ok(queue_length) => {
                self.metrics.record_enqueued();
                let notice = self
                    .metrics
                    .claim_notice(
                        queue_length,
                        self.saturation_threshold(),
                        self.config.log_interval(),
                        self.clock.now_millis(),
                    )
                    .then(|| state.bucket.available());
                Admission::Queued { ticket, queue_length, notice }
            }
            Err(full) => {
                self.metrics.record_rejected();
                Admission::Rejected { queued: full.queued, max: full.max }
            }
        }
    }

    /// One refill step: purge abandoned entries, refill, release as many as tokens allow.
    async fn tick(&self) {
        self.metrics.record_tick();

        let (released, purged) = {
            let mut state = self.lock_state();
            let purged = state.queue.purge(|release| release.is_closed());
            state.bucket.refill();

            let budget = if state.bucket.capacity() == 0 {
                // Unbuffered: this tick's credits go straight to the queue and are never banked.
                state.bucket.replenish_per_tick() as usize
            } else {
                let waiting = u32::try_from(state.queue.len()).unwrap_or(u32::MAX);
                let budget = state.bucket.available().min(waiting);
                let acquired = state.bucket.try_acquire_n(budget);
                debug_assert!(acquired);
                budget as usize
            };

            (state.queue.drain(budget), purged)
        };

        let (count, abandoned) = self.hand_off(released);
        let cancelled = purged + abandoned;
        if cancelled > 0 {
            self.metrics.record_cancelled(cancelled);
            tracing::debug!(cancelled, "dropped abandoned queue entries");
        }

        let (tokens_remaining, queue_length) = {
            let state = self.lock_state();
            (state.bucket.available(), state.queue.len())
        };
        if count > 0 {
            self.metrics.record_dequeued(count);
            tracing::debug!(count, tokens_remaining, queue_length, "released queued requests");
            self.emit(RegulatorEvent::Released { count, tokens_remaining }).await;
        }

        if self.metrics.claim_notice(
            queue_length,
            self.saturation_threshold(),
            self.config.log_interval(),
            self.clock.now_millis(),
        ) {
            self.notice_saturation(queue_length, tokens_remaining).await;
        }
    }

    /// Fire released continuations; returns `(delivered, abandoned)`.
    ///
    /// A caller that left between the purge and its release passes its token to the next
    /// waiter. With nobody waiting the token goes back to the bucket.
    fn hand_off(&self, released: Vec<Pending<Release>>) -> (usize, usize) {
        let mut delivered = 0;
        let mut abandoned = 0;
        let mut spare: u32 = 0;
        for pending in released {
            if pending.task.send(()).is_ok() {
                delivered += 1;
            } else {
                abandoned += 1;
                spare += 1;
            }
        }

        while spare > 0 {
            let next = {
                let mut state = self.lock_state();
                match state.queue.drain(1).pop() {
                    Some(next) => next,
                    None => {
                        state.bucket.restore(spare);
                        break;
                    }
                }
            };
            if next.task.send(()).is_ok() {
                delivered += 1;
                spare -= 1;
            } else {
                abandoned += 1;
            }
        }
        (delivered, abandoned)
    }
}

async fn drive<S>(inner: Weak<Inner<S>>, period: Duration)
where
    S: TelemetrySink,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.tick().await;
    }
    tracing::info!("refill driver stopped");
}

/// Builder for [`Regulator`]: sink, clock and sleeper overrides.
pub struct RegulatorBuilder<S> {
    config: RegulatorConfig,
    sink: S,
    clock: Arc<dyn Clock>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl RegulatorBuilder<NullSink> {
    pub fn new(config: RegulatorConfig) -> Self {
        Self { config, sink: NullSink, clock: Arc::new(MonotonicClock::default()), sleeper: None }
    }
}

impl<S> RegulatorBuilder<S>
where
    S: TelemetrySink,
{
    /// Send regulator events to `sink`.
    pub fn with_sink<T: TelemetrySink>(self, sink: T) -> RegulatorBuilder<T> {
        RegulatorBuilder { config: self.config, sink, clock: self.clock, sleeper: self.sleeper }
    }

    /// Override the clock used for log throttling.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how backoff delays are waited out.
    pub fn with_sleeper<Z: Sleeper + 'static>(mut self, sleeper: Z) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    pub fn build(self) -> Regulator<S> {
        let mut retry = RetryPolicyBuilder::from_config(&self.config);
        if let Some(sleeper) = self.sleeper {
            retry = retry.with_shared_sleeper(sleeper);
        }
        let state = State {
            bucket: TokenBucket::new(self.config.max_burst(), self.config.replenish_per_tick()),
            queue: WaitQueue::new(self.config.max_queue_length()),
        };
        Regulator {
            inner: Arc::new(Inner {
                config: self.config,
                state: Mutex::new(state),
                metrics: RegulatorMetrics::default(),
                retry: retry.build(),
                clock: self.clock,
                sink: self.sink,
                driver: Mutex::new(None),
            }),
        }
    }
}
