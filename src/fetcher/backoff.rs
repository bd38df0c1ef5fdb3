use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff for retries against a single endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            multiplier: config.multiplier.max(1.0),
            max_delay: config.max_delay(),
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Every delay a fully failing endpoint goes through before fallback
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|r| self.delay_for_retry(r)).collect()
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
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule_doubles() {
        let schedule = BackoffPolicy::default().schedule();
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[test]
    fn test_delay_capped() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5000),
        };
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_retry(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_single_attempt_has_no_retries() {
        let policy = BackoffPolicy {
            max_attempts: 1,
            ..BackoffPolicy::default()
        };
        assert!(policy.schedule().is_empty());
    }

    proptest! {
        #[test]
        fn delays_strictly_increase_below_cap(
            initial in 100u64..5_000,
            multiplier in 1.5f64..4.0,
            attempts in 2u32..8,
        ) {
            let policy = BackoffPolicy {
                max_attempts: attempts,
                initial_delay: Duration::from_millis(initial),
                multiplier,
                max_delay: Duration::from_secs(3600 * 24),
            };
            let schedule = policy.schedule();
            prop_assert_eq!(schedule.len() as u32, attempts - 1);
            for pair in schedule.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
        }
    }
}
