//! # Retry Backoff
//!
//! Fibonacci-based backoff used when a partition watch stream has to be reopened.
//! The sequence grows more slowly than exponential backoff, so a briefly
//! unavailable API server is retried quickly while a persistently failing one
//! is not hot-looped.
//!
//! With the default 5s minimum and 60s cap: 5s, 5s, 10s, 15s, 25s, 40s, 60s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    /// Minimum delay (first two values, and the value after reset)
    min: Duration,
    /// Previous delay
    prev: Duration,
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Number of delays handed out since the last reset
    attempts: u32,
}

impl RetryBackoff {
    /// Create a new backoff starting at `min` and capped at `max`.
    ///
    /// A `max` below `min` is raised to `min`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max: max.max(min),
            attempts: 0,
        }
    }

    /// Get the next delay and advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);
        self.attempts = self.attempts.saturating_add(1);

        result
    }

    /// Reset to the initial state after a healthy stream.
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests fail loudly on unexpected errors")]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_retry_backoff_sequence() {
        let mut backoff = RetryBackoff::new(secs(5), secs(60));

        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(10));
        assert_eq!(backoff.next_delay(), secs(15));
        assert_eq!(backoff.next_delay(), secs(25));
        assert_eq!(backoff.next_delay(), secs(40));
        assert_eq!(backoff.next_delay(), secs(60)); // max
        assert_eq!(backoff.next_delay(), secs(60));
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn test_retry_backoff_reset() {
        let mut backoff = RetryBackoff::new(secs(5), secs(60));

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(10));
    }

    #[test]
    fn test_fixed_delay_when_max_equals_min() {
        let mut backoff = RetryBackoff::new(secs(5), secs(5));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), secs(5));
        }
    }

    #[test]
    fn test_max_below_min_is_raised() {
        let mut backoff = RetryBackoff::new(secs(5), secs(1));
        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(5));
        assert_eq!(backoff.next_delay(), secs(5));
    }
}
