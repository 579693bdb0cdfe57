//! Process-lifetime counters and the throttled saturation notice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const NEVER: u64 = u64::MAX;

/// Monotonic counters shared by every handle of one regulator. Reset only by process restart.
#[derive(Debug)]
pub struct RegulatorMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    bypassed: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    ticks: AtomicU64,
    last_notice_ms: AtomicU64,
}

/// Point-in-time view of the counters plus live bucket/queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub bypassed: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub ticks: u64,
    pub queue_length: usize,
    pub tokens_available: u32,
}

impl Default for RegulatorMetrics {
    fn default() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            last_notice_ms: AtomicU64::new(NEVER),
        }
    }
}

impl RegulatorMetrics {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dequeued(&self, n: usize) {
        self.dequeued.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_bypassed(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, n: usize) {
        self.cancelled.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a saturation notice is due.
    ///
    /// True when `queue_length >= threshold` and no notice went out in the last `interval`
    /// (or ever). Claims the slot atomically, so concurrent callers emit at most one notice.
    pub(crate) fn claim_notice(
        &self,
        queue_length: usize,
        threshold: usize,
        interval: Duration,
        now_ms: u64,
    ) -> bool {
        if queue_length < threshold {
            return false;
        }
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_notice_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) < interval_ms {
            return false;
        }
        self.last_notice_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Snapshot the counters; live fields are filled in by the caller.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            queue_length: 0,
            tokens_available: 0,
        }
    }
}
