//! Backoff policy: decides retry delays.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::Signal;

/// Exponential backoff with a fixed rate-limit override.
///
/// `delay = base_delay * multiplier^attempt_index`, except a rate-limited
/// signal always waits `rate_limit_delay`.
///
/// With the defaults (1s base, multiplier 2.0):
/// - index 0: 1s
/// - index 1: 2s
/// - index 2: 4s
/// - 429 at any index: 30s
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub rate_limit_delay: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
        }
    }

    /// Delay before the retry that follows the failure at `attempt_index`
    /// (0-based: the first failed attempt is index 0).
    pub fn delay_for(&self, attempt_index: u32, signal: &Signal) -> Duration {
        if signal.is_rate_limited() {
            return self.rate_limit_delay;
        }
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= u64::MAX as f64 {
            return Duration::from_millis(u64::MAX);
        }
        Duration::from_millis(millis.round() as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.rate_limit_delay, Duration::from_secs(30));
    }

    #[test]
    fn transient_sequence_is_one_two_four_seconds() {
        let policy = BackoffPolicy::default();
        let timeout = Signal::from_message("ETIMEDOUT");
        let delays: Vec<u128> = (0..3)
            .map(|i| policy.delay_for(i, &timeout).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
    }

    #[test]
    fn rate_limit_overrides_exponential() {
        let policy = BackoffPolicy::default();
        let limited = Signal::http(429, "Too Many Requests");
        for i in 0..3 {
            assert_eq!(policy.delay_for(i, &limited), Duration::from_millis(30_000));
        }
    }

    #[test]
    fn huge_index_saturates_instead_of_panicking() {
        let policy = BackoffPolicy::default();
        let d = policy.delay_for(u32::MAX, &Signal::from_message("ETIMEDOUT"));
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }
}
