//! Convenient re-exports for common Tollgate types.
pub use crate::{
    backoff::{Backoff, MAX_BACKOFF},
    classifier::{Classifier, Target},
    config::{ConfigError, RegulatorConfig, RegulatorConfigBuilder},
    error::RegulatorError,
    jitter::Jitter,
    layer::{RegulatedRequest, RegulatorLayer},
    metrics::MetricsSnapshot,
    regulator::{Regulator, RegulatorBuilder},
    retry::{RetryPolicy, RetryPolicyBuilder, UpstreamResponse},
    telemetry::{LogSink, MemorySink, NullSink, RegulatorEvent, StreamingSink, TelemetrySink},
};
