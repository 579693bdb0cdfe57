//! Exponential backoff for the retry controller.
//!
//! Retry indices are zero-based: retry `0` is the sleep after the first failed attempt and waits
//! exactly `base`, retry `n` waits `base * 2^n`. There is no configurable ceiling; delays only
//! saturate at [`MAX_BACKOFF`] so very large retry counts never overflow.
//!
//! ```rust
//! use std::time::Duration;
//! use tollgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100));
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(400));
//! ```

use std::time::Duration;

/// Upper bound applied when a computed delay would overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Doubling delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    /// `base * 2^retry`.
    pub fn exponential(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = 2u128.saturating_pow(retry);
        let nanos = self.base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(1600));
    }

    #[test]
    fn never_drops_below_the_doubling_floor() {
        let base = Duration::from_millis(250);
        let backoff = Backoff::exponential(base);
        for retry in 0..20 {
            assert_eq!(backoff.delay(retry), base * 2u32.pow(retry));
        }
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), MAX_BACKOFF);
        assert_eq!(backoff.delay(200), MAX_BACKOFF);
    }

    #[test]
    fn zero_base_stays_zero() {
        let backoff = Backoff::exponential(Duration::ZERO);
        assert_eq!(backoff.delay(7), Duration::ZERO);
    }
}
