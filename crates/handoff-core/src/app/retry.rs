//! Retry policy: decides how many times and how long to wait between agent attempts.

use std::time::Duration;

/// Retry policy for a single dispatch.
///
/// `max_retries` counts the attempts made *after* the first one, so a dispatch
/// performs at most `max_retries + 1` physical submissions.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries; one physical attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after `attempts` failed attempts (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// With the defaults (1s, x2, cap 5s): 1s, 2s, 4s, 5s, 5s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[rstest]
    #[case::first(1, 1_000)]
    #[case::second(2, 2_000)]
    #[case::third(3, 4_000)]
    #[case::capped(4, 5_000)]
    #[case::still_capped(30, 5_000)]
    #[case::zero_uses_base(0, 1_000)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(attempts), Duration::from_millis(expected_ms));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn none_means_a_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
