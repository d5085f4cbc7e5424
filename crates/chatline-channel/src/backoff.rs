//! Linear, capped backoff for reconnection delays.
//!
//! `delay = base * min(attempt, cap_attempts)`. The attempt number is
//! 1-indexed at the time a retry is scheduled, so the first retry waits
//! exactly one base delay.

use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default number of attempts after which the delay stops growing.
pub const DEFAULT_CAP_ATTEMPTS: u32 = 5;

/// Backoff policy mapping an attempt number to a reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds.
    base_ms: u64,
    /// Attempt count at which linear growth stops.
    cap_attempts: u32,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub fn new(base_ms: u64, cap_attempts: u32) -> Self {
        Self {
            base_ms,
            cap_attempts,
        }
    }

    /// Base delay in milliseconds.
    #[must_use]
    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    /// Attempt count at which the delay stops growing.
    #[must_use]
    pub fn cap_attempts(&self) -> u32 {
        self.cap_attempts
    }

    /// Delay before the given (1-indexed) retry attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(attempt.min(self.cap_attempts));
        Duration::from_millis(self.base_ms.saturating_mul(factor))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_CAP_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_linearly_up_to_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
        assert_eq!(policy.delay(3), Duration::from_millis(3000));
        assert_eq!(policy.delay(4), Duration::from_millis(4000));
        assert_eq!(policy.delay(5), Duration::from_millis(5000));
    }

    #[test]
    fn capped_after_five_attempts() {
        let policy = BackoffPolicy::default();
        for attempt in [6, 7, 20, 1000] {
            assert_eq!(policy.delay(attempt), Duration::from_millis(5000));
        }
    }

    #[test]
    fn attempt_zero_is_immediate() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::ZERO);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let policy = BackoffPolicy::new(u64::MAX, u32::MAX);
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn custom_base_and_cap() {
        let policy = BackoffPolicy::new(250, 2);
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(9), Duration::from_millis(500));
        assert_eq!(policy.base_ms(), 250);
        assert_eq!(policy.cap_attempts(), 2);
    }
}
