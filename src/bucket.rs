//! Token bucket holding admission credits.
//!
//! The bucket is plain data: it does no locking and owns no timer. The [`Regulator`] keeps it
//! behind the same mutex as the wait queue and drives [`TokenBucket::refill`] from its tick loop.
//!
//! Invariant: `0 <= tokens <= capacity` after every operation, however many ticks were missed.
//!
//! [`Regulator`]: crate::Regulator

/// Integer token bucket. Starts full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u32,
    capacity: u32,
    replenish_per_tick: u32,
}

impl TokenBucket {
    pub fn new(capacity: u32, replenish_per_tick: u32) -> Self {
        Self { tokens: capacity, capacity, replenish_per_tick }
    }

    /// Take one token if any are left.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_n(1)
    }

    /// Take `n` tokens, all or nothing.
    pub fn try_acquire_n(&mut self, n: u32) -> bool {
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Add one tick's worth of tokens, clamped to capacity. Returns how many were actually added.
    pub fn refill(&mut self) -> u32 {
        let before = self.tokens;
        self.tokens = self.tokens.saturating_add(self.replenish_per_tick).min(self.capacity);
        self.tokens - before
    }

    /// Return `n` unused tokens, clamped to capacity.
    pub fn restore(&mut self, n: u32) {
        self.tokens = self.tokens.saturating_add(n).min(self.capacity);
    }

    pub fn available(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn replenish_per_tick(&self) -> u32 {
        self.replenish_per_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_empty() {
        let mut bucket = TokenBucket::new(3, 1);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn refill_clamps_to_capacity() {
        let mut bucket = TokenBucket::new(3, 2);
        assert!(bucket.try_acquire_n(3));
        assert_eq!(bucket.refill(), 2);
        assert_eq!(bucket.available(), 2);
        assert_eq!(bucket.refill(), 1);
        assert_eq!(bucket.available(), 3);

        // Any number of missed ticks still lands on capacity.
        for _ in 0..1_000 {
            bucket.refill();
        }
        assert_eq!(bucket.available(), 3);
    }

    #[test]
    fn refill_larger_than_capacity_is_clamped() {
        let mut bucket = TokenBucket::new(2, 10);
        assert!(bucket.try_acquire_n(2));
        assert_eq!(bucket.refill(), 2);
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn acquire_n_is_all_or_nothing() {
        let mut bucket = TokenBucket::new(2, 1);
        assert!(!bucket.try_acquire_n(3));
        assert_eq!(bucket.available(), 2);
        assert!(bucket.try_acquire_n(0));
        assert!(bucket.try_acquire_n(2));
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn restored_tokens_respect_capacity() {
        let mut bucket = TokenBucket::new(3, 1);
        assert!(bucket.try_acquire_n(2));
        bucket.restore(1);
        assert_eq!(bucket.available(), 2);
        bucket.restore(10);
        assert_eq!(bucket.available(), 3);

        let mut unbuffered = TokenBucket::new(0, 2);
        unbuffered.restore(2);
        assert_eq!(unbuffered.available(), 0);
    }

    #[test]
    fn zero_capacity_is_always_empty() {
        let mut bucket = TokenBucket::new(0, 5);
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.refill(), 0);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn saturating_replenish_never_overflows() {
        let mut bucket = TokenBucket::new(u32::MAX, u32::MAX);
        assert!(bucket.try_acquire());
        bucket.refill();
        assert_eq!(bucket.available(), u32::MAX);
    }
}
