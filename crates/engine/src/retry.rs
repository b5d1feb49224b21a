//! Retry configuration for per-recipient sends.

use std::time::Duration;

use mailops_common::config::EngineConfig;

/// Retry configuration with exponential backoff.
///
/// Applies only to transient provider failures; a fatal failure records the
/// recipient as failed immediately. The retry budget is per recipient and
/// never escalates to the job.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build from the engine config's total-attempt budget.
    #[must_use]
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_send_attempts.saturating_sub(1),
            ..Self::default()
        }
    }

    /// Calculate delay for the given retry number (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return self.max_delay;
        }

        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(delay_secs);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Check if another retry is allowed after `attempt` retries.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 4,
            ..Default::default()
        };

        // First retry: 2s
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        // Second retry: 4s
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(16));
    }

    #[test]
    fn test_max_delay() {
        let config = RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_secs(40),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        };

        // Should be capped at max_delay
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();

        // Two retries after the first attempt, three attempts total.
        assert!(config.should_retry(0));
        assert!(config.should_retry(1));
        assert!(!config.should_retry(2));
    }

    #[test]
    fn test_from_engine_config() {
        let engine = EngineConfig {
            max_send_attempts: 3,
            ..Default::default()
        };
        assert_eq!(RetryConfig::from_engine_config(&engine).max_retries, 2);
    }
}
