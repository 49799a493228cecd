//! Retry policy for delivery operations.
//!
//! One attempt is one full cascade across every active transport. After the
//! `n`th failed attempt the item becomes eligible again after
//! `min(base * 2^n, max) * (1 ± jitter)`. With the defaults that is exactly
//! `2^n` minutes.

use chrono::{DateTime, Duration, Utc};
use missive_common::Priority;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Unit of the exponential backoff (in seconds).
    ///
    /// Default: 60 seconds (1 minute)
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Caps the exponential backoff (in seconds).
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,

    /// Delays are randomized within ±`jitter_factor`.
    ///
    /// Default: 0.0 (deterministic)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,

    /// Attempts granted to `URGENT` messages.
    ///
    /// Default: 5
    #[serde(default = "defaults::urgent_max_retries")]
    pub urgent_max_retries: u32,

    /// Attempts granted to every other priority.
    ///
    /// Default: 3
    #[serde(default = "defaults::default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            jitter_factor: defaults::jitter_factor(),
            urgent_max_retries: defaults::urgent_max_retries(),
            default_max_retries: defaults::default_max_retries(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt budget for a message, fixed once at enqueue time. Never below one.
    #[must_use]
    pub fn max_retries(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Urgent => self.urgent_max_retries,
            Priority::Low | Priority::Medium | Priority::High => self.default_max_retries,
        }
        .max(1)
    }

    /// Backoff after `attempts` failed cascades
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let delay = if attempts >= 63 {
            self.max_delay_secs
        } else {
            self.base_delay_secs
                .saturating_mul(1u64 << attempts)
                .min(self.max_delay_secs)
        };

        // Intentional precision loss and casting for randomization
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = if self.jitter_factor > 0.0 {
            let jitter_range = (delay as f64) * self.jitter_factor.min(1.0);
            let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
            ((delay as f64) + jitter).max(0.0) as u64
        } else {
            delay
        };

        i64::try_from(jittered)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// When an item that has just failed its `attempts`th cascade may run again
    #[must_use]
    pub fn next_retry(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.delay(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

mod defaults {
    pub const fn base_delay_secs() -> u64 {
        60 // 1 minute
    }

    pub const fn max_delay_secs() -> u64 {
        86400 // 24 hours
    }

    pub const fn jitter_factor() -> f64 {
        0.0
    }

    pub const fn urgent_max_retries() -> u32 {
        5
    }

    pub const fn default_max_retries() -> u32 {
        3
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_secs, 60);
        assert_eq!(policy.max_delay_secs, 86400);
        assert!(policy.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(policy.urgent_max_retries, 5);
        assert_eq!(policy.default_max_retries, 3);
    }

    #[test]
    fn test_max_retries_by_priority() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(Priority::Urgent), 5);
        assert_eq!(policy.max_retries(Priority::High), 3);
        assert_eq!(policy.max_retries(Priority::Medium), 3);
        assert_eq!(policy.max_retries(Priority::Low), 3);

        let policy = RetryPolicy {
            default_max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.max_retries(Priority::Low), 1);
    }

    #[test]
    fn test_exponential_minutes() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        assert_eq!(policy.next_retry(1, now), now + Duration::minutes(2));
        assert_eq!(policy.next_retry(2, now), now + Duration::minutes(4));
        assert_eq!(policy.next_retry(3, now), now + Duration::minutes(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay_secs: 300,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay(2), Duration::seconds(240));
        assert_eq!(policy.delay(3), Duration::seconds(300));
        assert_eq!(policy.delay(100), Duration::seconds(300));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let delay = policy.delay(1).num_seconds();
            assert!((96..=144).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_parse_with_defaults() {
        let policy: RetryPolicy = ron::from_str("(base_delay_secs: 30)").unwrap();
        assert_eq!(policy.base_delay_secs, 30);
        assert_eq!(policy.urgent_max_retries, 5);
    }
}
