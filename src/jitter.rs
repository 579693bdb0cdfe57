//! Jitter strategies that decorrelate callers backing off in lockstep.
//!
//! - `None`: exact backoff delay, for deterministic tests.
//! - `Additive`: `delay + uniform[0, max]`.
//!
//! Neither strategy ever shortens the delay: a jittered sleep is at least the backoff delay.
//!
//! RNG: `rand`'s thread-local RNG by default; inject a seeded RNG through `apply_with_rng`.
//! Millisecond conversions saturate to `u64::MAX`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No randomization.
    None,
    /// Add a uniform random offset in `[0, max]`.
    Additive(Duration),
}

impl Jitter {
    /// Additive jitter bounded by `max`; a zero bound degrades to [`Jitter::None`].
    pub fn additive(max: Duration) -> Self {
        if max.is_zero() {
            Jitter::None
        } else {
            Jitter::Additive(max)
        }
    }

    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Additive(max) => {
                let bound = as_millis_saturated(*max);
                let offset = rng.random_range(0..=bound);
                delay.saturating_add(Duration::from_millis(offset))
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
