//! Exponential backoff schedule for reconnection.
//!
//! Delay for attempt `n` is `min(base * 2^n, max)`; the budget is finite
//! and exhaustion is terminal for the schedule.

use std::time::Duration;

/// Tracks the reconnection attempt counter and produces the next delay.
#[derive(Debug)]
pub struct ReconnectSchedule {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectSchedule {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Advance to the next attempt and return its delay, or `None` once the
    /// retry budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// The attempt number of the most recently returned delay.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_matches_contract() {
        let mut schedule = ReconnectSchedule::new(
            5,
            Duration::from_millis(1000),
            Duration::from_millis(30000),
        );

        // min(1000 * 2^n, 30000) for n = 1..5.
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(8000)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(16000)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(30000)));

        // Budget exhausted: no further automatic attempts.
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempt(), 5);
    }

    #[test]
    fn test_zero_budget_never_yields_a_delay() {
        let mut schedule =
            ReconnectSchedule::new(0, Duration::from_millis(1000), Duration::from_millis(30000));
        assert_eq!(schedule.next_delay(), None);
    }
}
