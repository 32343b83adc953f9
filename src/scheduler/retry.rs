//! Retry classification and backoff for generator calls.
//!
//! Decisions here are pure: error plus attempt count in, retry/backoff out. Slot
//! handling lives in the gate and the pipeline, not here.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::generator::GeneratorError;

/// Lowest fraction of the exponential delay a jittered delay can fall to.
pub const MIN_JITTER: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout or provider rate limit. Worth retrying.
    Transient,
    /// Auth, config, or malformed content. Retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, error: &GeneratorError) -> ErrorClass {
        if error.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// Whether to try again after `attempt` calls (1-based) have failed with `error`.
    pub fn should_retry(&self, error: &GeneratorError, attempt: u32) -> bool {
        self.classify(error) == ErrorClass::Transient && attempt < self.max_attempts
    }

    /// Jittered exponential delay before the attempt following `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(MIN_JITTER..=1.0);
        self.backoff_delay_with_jitter(attempt, jitter)
    }

    /// `min(base * 2^(attempt-1), max) * jitter`, jitter clamped to `[MIN_JITTER, 1]`.
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let uncapped = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.max_delay);
        capped.mul_f64(jitter.clamp(MIN_JITTER, 1.0))
    }

    /// Delay for a specific error, honoring a provider retry-after up to `max_delay`.
    pub fn delay_for(&self, error: &GeneratorError, attempt: u32) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match error.retry_after() {
            Some(hint) => backoff.max(hint.min(self.max_delay)),
            None => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn test_classify() {
        let p = policy();
        assert_eq!(p.classify(&GeneratorError::Timeout), ErrorClass::Transient);
        assert_eq!(
            p.classify(&GeneratorError::RateLimited { retry_after: None }),
            ErrorClass::Transient
        );
        assert_eq!(
            p.classify(&GeneratorError::Auth("denied".to_string())),
            ErrorClass::Permanent
        );
        assert_eq!(
            p.classify(&GeneratorError::MalformedResponse("x".to_string())),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_should_retry_transient_until_limit() {
        let p = policy();
        let err = GeneratorError::Network("reset".to_string());
        assert!(p.should_retry(&err, 1));
        assert!(p.should_retry(&err, 2));
        assert!(!p.should_retry(&err, 3));
    }

    #[test]
    fn test_should_not_retry_permanent() {
        let p = policy();
        assert!(!p.should_retry(&GeneratorError::InvalidConfig("no url".to_string()), 1));
    }

    #[test]
    fn test_backoff_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.backoff_delay_with_jitter(1, 1.0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay_with_jitter(2, 1.0), Duration::from_millis(200));
        assert_eq!(p.backoff_delay_with_jitter(3, 1.0), Duration::from_millis(400));
        assert_eq!(p.backoff_delay_with_jitter(5, 1.0), Duration::from_millis(1000));
        assert_eq!(p.backoff_delay_with_jitter(60, 1.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let p = policy();
        assert_eq!(p.backoff_delay_with_jitter(2, 0.5), Duration::from_millis(100));
        // Out-of-range jitter is clamped.
        assert_eq!(p.backoff_delay_with_jitter(2, 0.0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay_with_jitter(2, 3.0), Duration::from_millis(200));

        for _ in 0..50 {
            let d = p.backoff_delay(3);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_delay_for_respects_retry_after_within_cap() {
        let p = policy();
        let err = GeneratorError::RateLimited {
            retry_after: Some(Duration::from_millis(700)),
        };
        assert_eq!(p.delay_for(&err, 1), Duration::from_millis(700));

        let err = GeneratorError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(p.delay_for(&err, 1), Duration::from_millis(1000));
    }

    #[test]
    fn test_new_enforces_minimums() {
        let p = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(1));
        assert_eq!(p.max_attempts(), 1);
        assert_eq!(p.backoff_delay_with_jitter(1, 1.0), Duration::from_millis(10));
    }
}
