//! # Retry Policy
//!
//! Failed upload items are retried with exponential backoff and parked in
//! DEAD_LETTER once they exhaust their attempts.
//!
//! ```text
//! attempt:   1      2     3     4     5     6      7      8 ...  10
//! wait:    500ms   1s    2s    4s    8s   16s    32s    60s ...  DEAD_LETTER
//!                                                      (capped)
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RetrySettings;

/// What to do with an item that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            initial: Duration::from_millis(settings.initial_backoff_ms),
            max: Duration::from_secs(settings.max_backoff_secs),
            multiplier: settings.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the `failures`-th failure (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut wait = self.initial;
        for _ in 0..failures.max(1) {
            wait = backoff.next_backoff().unwrap_or(self.max);
        }
        wait.min(self.max)
    }

    /// Decides the fate of an item that had `prior_failures` before this one.
    pub fn decide(&self, prior_failures: i64, now: DateTime<Utc>) -> RetryDecision {
        let failures = u32::try_from(prior_failures.max(0))
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        if failures >= self.max_attempts {
            return RetryDecision::DeadLetter;
        }

        let wait = chrono::Duration::from_std(self.backoff_for(failures))
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        RetryDecision::RetryAt(now + wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(32));
        assert_eq!(policy.backoff_for(8), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(20), Duration::from_secs(60));
    }

    #[test]
    fn test_decide_retries_until_max_attempts() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        assert_eq!(
            policy.decide(0, now),
            RetryDecision::RetryAt(now + chrono::Duration::milliseconds(500))
        );
        assert!(matches!(policy.decide(8, now), RetryDecision::RetryAt(_)));
        // Tenth failure.
        assert_eq!(policy.decide(9, now), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(42, now), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_custom_settings() {
        let policy = RetryPolicy::from(&RetrySettings {
            max_attempts: 2,
            initial_backoff_ms: 100,
            max_backoff_secs: 1,
            multiplier: 3.0,
        });
        assert_eq!(policy.backoff_for(2), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(1));
        assert_eq!(policy.decide(1, Utc::now()), RetryDecision::DeadLetter);
    }
}
