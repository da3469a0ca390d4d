//! Exponential backoff with jitter for transient provider failures.
//!
//! Which errors count as transient is decided by
//! [`GatewayError::is_retryable`](crate::error::GatewayError::is_retryable);
//! this module only shapes the delays between attempts.

use std::time::Duration;

/// Delay policy for transport-level retries.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Growth factor per retry: initial, initial × multiplier, ...
    pub multiplier: f64,

    /// Cap on any single delay, bounding blowup during sustained outages.
    pub max_delay: Duration,

    /// Jitter strategy. Default: full.
    pub jitter: JitterStrategy,

    /// Honor provider `Retry-After` hints instead of the computed delay.
    pub respect_retry_after: bool,
}

/// Jitter spreads retries from concurrent callers sharing a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Delay is exactly the computed value.
    None,

    /// Random value in `[0, computed_delay]`.
    Full,

    /// `computed_delay/2 + random in [0, computed_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// Defaults for pay-per-token cloud APIs: 3 retries, 1s initial,
    /// doubling, 60s cap, full jitter, Retry-After honored.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    /// No retries. For tests and callers that handle errors themselves.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// Standard policy with a different retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay for retry attempt N (0-indexed), jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: JitterStrategy::None,
            ..BackoffConfig::standard()
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(5),
            ..no_jitter()
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_full_jitter_within_range() {
        let config = BackoffConfig::standard();
        for _ in 0..100 {
            let d = config.delay_for_attempt(1);
            assert!(d <= Duration::from_secs(2), "delay {:?} above ceiling", d);
        }
    }

    #[test]
    fn test_equal_jitter_has_floor() {
        let config = BackoffConfig {
            jitter: JitterStrategy::Equal,
            ..BackoffConfig::standard()
        };
        for _ in 0..100 {
            let d = config.delay_for_attempt(1);
            assert!(d >= Duration::from_secs(1), "delay {:?} below half", d);
            assert!(d <= Duration::from_secs(2), "delay {:?} above ceiling", d);
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(BackoffConfig::none().max_retries, 0);
        assert_eq!(BackoffConfig::standard().max_retries, 3);
        assert_eq!(BackoffConfig::standard().with_max_retries(5).max_retries, 5);
        assert!(BackoffConfig::standard().respect_retry_after);
    }
}
