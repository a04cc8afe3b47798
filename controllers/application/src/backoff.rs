//! # Fibonacci Backoff
//!
//! Progressive backoff for transient API-server errors. Grows more slowly
//! than doubling, so a resource that keeps hitting conflicts or throttling
//! backs off without disappearing for long stretches.
//!
//! Sequence with the default bounds (5s min, 300s max):
//! 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s (capped).

use std::time::Duration;

/// Fibonacci backoff calculator.
///
/// Each delay is the sum of the previous two, starting from `min_seconds`
/// and capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Creates a backoff with the given bounds in seconds.
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_seconds);

        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);

        result
    }

    /// Resets the sequence after a successful reconcile.
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }

    /// Stateless delay for the nth consecutive error.
    ///
    /// Used by the error policy, which only tracks an error count per
    /// resource key rather than a live backoff object.
    #[must_use]
    pub fn calculate_for_error_count(
        error_count: u32,
        min_seconds: u64,
        max_seconds: u64,
    ) -> Duration {
        if error_count <= 1 {
            return Duration::from_secs(min_seconds);
        }

        let mut prev = min_seconds;
        let mut current = min_seconds;
        for _ in 2..=error_count {
            let next = prev + current;
            prev = current;
            current = std::cmp::min(next, max_seconds);
            if current >= max_seconds {
                break;
            }
        }

        Duration::from_secs(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_fibonacci_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(25));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(40));
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = FibonacciBackoff::new(5, 60);

        let mut last = Duration::ZERO;
        for _ in 0..12 {
            last = backoff.next_backoff();
        }
        assert_eq!(last, Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn stateless_calculation_matches_sequence() {
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(0, 5, 300),
            Duration::from_secs(5)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(1, 5, 300),
            Duration::from_secs(5)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(3, 5, 300),
            Duration::from_secs(15)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(5, 5, 300),
            Duration::from_secs(40)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(50, 5, 300),
            Duration::from_secs(300)
        );
    }
}
