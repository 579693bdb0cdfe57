//! Retry/backoff controller for upstream calls.
//!
//! Semantics:
//! - `max_retries` counts re-attempts after the first try, so an always-failing call runs
//!   `max_retries + 1` times.
//! - A transport error (`Err`) or a response whose status is in the retryable set is transient.
//!   Everything else (2xx, 3xx, non-retryable 4xx) returns after one attempt.
//! - Before retry `n` (zero-based) the controller sleeps `base * 2^n` plus jitter.
//! - When retries run out the last outcome is returned as-is: a retryable *response* comes back
//!   as `Ok(response)`, a transport failure as `Err(error)`.
//!
//! ```rust
//! use std::time::Duration;
//! use tollgate::{Backoff, InstantSleeper, Jitter, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_millis(100)))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build();
//! let status: Result<u16, std::io::Error> = policy.run(|| async { Ok(503u16) }).await;
//! assert_eq!(status.unwrap(), 503);
//! # });
//! ```

use crate::config::RegulatorConfig;
use crate::telemetry::{emit_best_effort, NullSink, RegulatorEvent, TelemetrySink};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Anything carrying an HTTP status code.
pub trait UpstreamResponse {
    fn status(&self) -> u16;
}

impl UpstreamResponse for u16 {
    fn status(&self) -> u16 {
        *self
    }
}

/// Retry policy combining status classification, backoff, jitter and a sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    jitter: Jitter,
    retryable: Arc<BTreeSet<u16>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy matching the backoff fields of a regulator config.
    pub fn from_config(config: &RegulatorConfig) -> Self {
        RetryPolicyBuilder::from_config(config).build()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable.contains(&status)
    }

    /// Delay before retry `retry` (zero-based), jitter included.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(retry))
    }

    /// Run `operation` with retries, without telemetry.
    pub async fn run<R, E, Fut, Op>(&self, operation: Op) -> Result<R, E>
    where
        R: UpstreamResponse + Send,
        E: Send,
        Fut: Future<Output = Result<R, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.run_with_sink(operation, &NullSink).await
    }

    /// Run `operation` with retries, reporting each retry and exhaustion to `sink`.
    pub async fn run_with_sink<R, E, Fut, Op, S>(&self, mut operation: Op, sink: &S) -> Result<R, E>
    where
        R: UpstreamResponse + Send,
        E: Send,
        Fut: Future<Output = Result<R, E>> + Send,
        Op: FnMut() -> Fut + Send,
        S: TelemetrySink,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = operation().await;
            let status = outcome.as_ref().ok().map(|response| response.status());
            if status.is_some_and(|s| !self.is_retryable(s)) {
                return outcome;
            }

            if attempt >= self.max_retries {
                tracing::debug!(attempts = attempt + 1, ?status, "retries exhausted");
                emit_best_effort(
                    sink.clone(),
                    RegulatorEvent::RetryExhausted { attempts: attempt + 1, status },
                )
                .await;
                return outcome;
            }
            drop(outcome);

            let delay = self.delay_for(attempt);
            attempt += 1;
            tracing::debug!(attempt, ?delay, ?status, "retrying upstream call");
            emit_best_effort(sink.clone(), RegulatorEvent::RetryAttempt { attempt, delay, status })
                .await;
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_retries: u32,
    backoff: Backoff,
    jitter: Jitter,
    retryable: BTreeSet<u16>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Defaults mirror [`RegulatorConfig::default`].
    pub fn new() -> Self {
        Self::from_config(&RegulatorConfig::default())
    }

    /// Start from the backoff fields of `config`.
    pub fn from_config(config: &RegulatorConfig) -> Self {
        Self {
            max_retries: config.max_retries(),
            backoff: Backoff::exponential(config.base_delay()),
            jitter: Jitter::additive(config.jitter()),
            retryable: config.retryable_statuses().clone(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable = statuses.into_iter().collect();
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            retryable: Arc::new(self.retryable),
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
