//! Regulator configuration.
//!
//! Built once at startup and immutable afterwards. Construct it with
//! [`RegulatorConfig::builder`], or (feature `serde`) load it from a JSON document whose keys
//! mirror the builder in camelCase with durations in milliseconds:
//!
//! ```json
//! {
//!   "enabled": true,
//!   "maxBurst": 5,
//!   "replenishPerTick": 1,
//!   "tickIntervalMs": 1000,
//!   "maxQueueLength": 100,
//!   "baseDelayMs": 500,
//!   "maxRetries": 3,
//!   "jitterMs": 250,
//!   "retryableStatuses": [429, 500, 502, 503, 504],
//!   "logThreshold": 10,
//!   "logIntervalMs": 5000,
//!   "regulatedHosts": ["hooks.example.com"],
//!   "regulatedPathPrefixes": ["/api/automation"]
//! }
//! ```
//!
//! Missing keys take the builder defaults.

use crate::classifier::Classifier;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_BURST: u32 = 5;
const DEFAULT_REPLENISH_PER_TICK: u32 = 1;
const DEFAULT_TICK_INTERVAL_MILLIS: u64 = 1_000;
const DEFAULT_MAX_QUEUE_LENGTH: usize = 100;
const DEFAULT_BASE_DELAY_MILLIS: u64 = 500;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_JITTER_MILLIS: u64 = 250;
const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
const DEFAULT_LOG_THRESHOLD: usize = 10;
const DEFAULT_LOG_INTERVAL_MILLIS: u64 = 5_000;

/// Errors produced while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("status {0} is not a valid HTTP status code")]
    InvalidStatus(u16),
    #[error("{0} rule must not be empty")]
    EmptyRule(&'static str),
    #[error("invalid config document: {0}")]
    Document(String),
}

/// Immutable regulator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatorConfig {
    enabled: bool,
    max_burst: u32,
    replenish_per_tick: u32,
    tick_interval: Duration,
    max_queue_length: usize,
    base_delay: Duration,
    max_retries: u32,
    jitter: Duration,
    retryable_statuses: BTreeSet<u16>,
    log_threshold: usize,
    log_interval: Duration,
    classifier: Classifier,
}

impl RegulatorConfig {
    pub fn builder() -> RegulatorConfigBuilder {
        RegulatorConfigBuilder::new()
    }

    /// Parse and validate a JSON config document.
    #[cfg(feature = "serde")]
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let doc: document::ConfigDocument =
            serde_json::from_str(raw).map_err(|e| ConfigError::Document(e.to_string()))?;
        Self::try_from(doc)
    }

    /// Global switch; when off every call bypasses regulation.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Bucket capacity.
    pub fn max_burst(&self) -> u32 {
        self.max_burst
    }

    pub fn replenish_per_tick(&self) -> u32 {
        self.replenish_per_tick
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Backpressure ceiling for the wait queue.
    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound of the random offset added to each backoff delay.
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    pub fn retryable_statuses(&self) -> &BTreeSet<u16> {
        &self.retryable_statuses
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Queue length at which saturation notices start.
    pub fn log_threshold(&self) -> usize {
        self.log_threshold
    }

    /// Minimum gap between two saturation notices.
    pub fn log_interval(&self) -> Duration {
        self.log_interval
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_burst: DEFAULT_MAX_BURST,
            replenish_per_tick: DEFAULT_REPLENISH_PER_TICK,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MILLIS),
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MILLIS),
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: Duration::from_millis(DEFAULT_JITTER_MILLIS),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            log_threshold: DEFAULT_LOG_THRESHOLD,
            log_interval: Duration::from_millis(DEFAULT_LOG_INTERVAL_MILLIS),
            classifier: Classifier::none(),
        }
    }
}

/// Builder for [`RegulatorConfig`]; `build` validates.
#[derive(Debug, Clone)]
pub struct RegulatorConfigBuilder {
    config: RegulatorConfig,
    hosts: Vec<String>,
    path_prefixes: Vec<String>,
}

impl RegulatorConfigBuilder {
    pub fn new() -> Self {
        Self { config: RegulatorConfig::default(), hosts: Vec::new(), path_prefixes: Vec::new() }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Bucket capacity. Zero is valid: nothing is admitted immediately and the queue is
    /// released at `replenish_per_tick` per tick.
    pub fn max_burst(mut self, max_burst: u32) -> Self {
        self.config.max_burst = max_burst;
        self
    }

    pub fn replenish_per_tick(mut self, tokens: u32) -> Self {
        self.config.replenish_per_tick = tokens;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn max_queue_length(mut self, len: usize) -> Self {
        self.config.max_queue_length = len;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Retries after the first attempt; `0` disables retrying.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Replace the retryable status set.
    pub fn retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.config.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn log_threshold(mut self, threshold: usize) -> Self {
        self.config.log_threshold = threshold;
        self
    }

    pub fn log_interval(mut self, interval: Duration) -> Self {
        self.config.log_interval = interval;
        self
    }

    /// Regulate every call to this host.
    pub fn regulate_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    /// Regulate every call under this path prefix.
    pub fn regulate_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefixes.push(prefix.into());
        self
    }

    pub fn build(self) -> Result<RegulatorConfig, ConfigError> {
        let mut config = self.config;
        if config.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if let Some(bad) = config.retryable_statuses.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(ConfigError::InvalidStatus(*bad));
        }

        let mut classifier = Classifier::none();
        for host in &self.hosts {
            classifier = classifier.with_host(host)?;
        }
        for prefix in &self.path_prefixes {
            classifier = classifier.with_path_prefix(prefix)?;
        }
        config.classifier = classifier;
        Ok(config)
    }
}

impl Default for RegulatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "serde")]
mod document {
    use super::{ConfigError, RegulatorConfig, RegulatorConfigBuilder};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    pub(super) struct ConfigDocument {
        enabled: Option<bool>,
        max_burst: Option<u32>,
        replenish_per_tick: Option<u32>,
        tick_interval_ms: Option<u64>,
        max_queue_length: Option<usize>,
        base_delay_ms: Option<u64>,
        max_retries: Option<u32>,
        jitter_ms: Option<u64>,
        retryable_statuses: Option<Vec<u16>>,
        log_threshold: Option<usize>,
        log_interval_ms: Option<u64>,
        #[serde(default)]
        regulated_hosts: Vec<String>,
        #[serde(default)]
        regulated_path_prefixes: Vec<String>,
    }

    impl TryFrom<ConfigDocument> for RegulatorConfig {
        type Error = ConfigError;

        fn try_from(doc: ConfigDocument) -> Result<Self, Self::Error> {
            let mut builder = RegulatorConfigBuilder::new();
            if let Some(v) = doc.enabled {
                builder = builder.enabled(v);
            }
            if let Some(v) = doc.max_burst {
                builder = builder.max_burst(v);
            }
            if let Some(v) = doc.replenish_per_tick {
                builder = builder.replenish_per_tick(v);
            }
            if let Some(v) = doc.tick_interval_ms {
                builder = builder.tick_interval(Duration::from_millis(v));
            }
            if let Some(v) = doc.max_queue_length {
                builder = builder.max_queue_length(v);
            }
            if let Some(v) = doc.base_delay_ms {
                builder = builder.base_delay(Duration::from_millis(v));
            }
            if let Some(v) = doc.max_retries {
                builder = builder.max_retries(v);
            }
            if let Some(v) = doc.jitter_ms {
                builder = builder.jitter(Duration::from_millis(v));
            }
            if let Some(v) = doc.retryable_statuses {
                builder = builder.retryable_statuses(v);
            }
            if let Some(v) = doc.log_threshold {
                builder = builder.log_threshold(v);
            }
            if let Some(v) = doc.log_interval_ms {
                builder = builder.log_interval(Duration::from_millis(v));
            }
            for host in doc.regulated_hosts {
                builder = builder.regulate_host(host);
            }
            for prefix in doc.regulated_path_prefixes {
                builder = builder.regulate_path_prefix(prefix);
            }
            builder.build()
        }
    }
}
