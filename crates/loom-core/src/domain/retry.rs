//! Retry policy: backoff delays bounded by a total timeout.

use std::time::Duration;

/// Retry policy for optimistic read-modify-write loops.
///
/// `multiplier = 1.0` gives a fixed backoff (the join store default).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Give up once this much time has been spent retrying.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            base_delay: interval,
            multiplier: 1.0,
            timeout,
        }
    }

    /// Delay before the next retry.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another attempt fits in the budget after `elapsed`.
    pub fn allows_retry(&self, elapsed: Duration, attempts: u32) -> bool {
        elapsed + self.next_delay(attempts) <= self.timeout
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(50), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_does_not_grow() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_millis(10));
        assert_eq!(policy.next_delay(7), Duration::from_millis(10));
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn timeout_bounds_retries() {
        let policy = RetryPolicy::fixed(Duration::from_millis(100), Duration::from_millis(250));
        assert!(policy.allows_retry(Duration::ZERO, 1));
        assert!(policy.allows_retry(Duration::from_millis(150), 2));
        assert!(!policy.allows_retry(Duration::from_millis(200), 3));
    }
}
