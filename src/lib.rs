#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Client-side admission control for calls to a throttled upstream.
//!
//! A [`Regulator`] sits in front of every outbound call. Calls whose [`Target`] matches the
//! configured rules spend a token from a bounded bucket; when the bucket is empty they wait in
//! a bounded FIFO queue until a periodic refill releases them, or are rejected immediately when
//! the queue is full. Admitted calls that come back with a transient failure are retried with
//! exponential backoff plus jitter. Everything else passes straight through.
//!
//! ## Features
//!
//! - **Token bucket** with burst capacity and per-tick replenishment
//! - **Bounded wait queue** released strictly in arrival order
//! - **Retry** on transport errors and configurable status codes
//! - **Tower integration** through [`Regulator::install`]
//! - **Telemetry** as a `tower::Service` sink plus `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{Regulator, RegulatorConfig, Target};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RegulatorConfig::builder()
//!         .max_burst(5)
//!         .replenish_per_tick(1)
//!         .tick_interval(Duration::from_secs(1))
//!         .regulate_host("hooks.example.com")
//!         .build()
//!         .unwrap();
//!     let regulator = Regulator::new(config);
//!
//!     let target = Target::new("hooks.example.com", "/catch/1");
//!     let status = regulator
//!         .execute(&target, || async { Ok::<u16, std::io::Error>(200) })
//!         .await
//!         .unwrap();
//!     assert_eq!(status, 200);
//! }
//! ```

pub mod backoff;
pub mod bucket;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod jitter;
pub mod layer;
pub mod metrics;
pub mod prelude;
pub mod queue;
pub mod regulator;
pub mod retry;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, MAX_BACKOFF};
pub use bucket::TokenBucket;
pub use classifier::{Classifier, Target};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, RegulatorConfig, RegulatorConfigBuilder};
pub use error::RegulatorError;
pub use jitter::Jitter;
pub use layer::{RegulatedRequest, RegulatorLayer, RegulatorService};
pub use metrics::MetricsSnapshot;
pub use queue::WaitQueue;
pub use regulator::{Regulator, RegulatorBuilder};
pub use retry::{RetryPolicy, RetryPolicyBuilder, UpstreamResponse};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
