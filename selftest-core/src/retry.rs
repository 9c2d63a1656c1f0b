//! Bounded retry policy shared by provisioning polls and teardown.
//!
//! Formula: `min(max_backoff, initial_backoff * 2^(attempt-1))`, no jitter,
//! so schedules are reproducible in tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum attempts plus exponential backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Default policy for provisioning status polls.
    ///
    /// 5s doubling up to 60s over 30 attempts covers the 15 minute
    /// provisioning window with room to spare.
    pub const fn provisioning() -> Self {
        Self::new(30, Duration::from_secs(5), Duration::from_secs(60))
    }

    /// Default policy for destroy retries.
    pub const fn teardown() -> Self {
        Self::new(10, Duration::from_secs(2), Duration::from_secs(30))
    }

    /// Attempts this policy allows, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy::new(50, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(p.backoff(6), Duration::from_secs(30));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn should_retry_respects_bound() {
        let p = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let p = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(p.attempts(), 1);
        assert!(!p.should_retry(1));
    }

    #[test]
    fn defaults_are_sane() {
        assert_eq!(RetryPolicy::teardown().attempts(), 10);
        assert!(RetryPolicy::provisioning().backoff(1) >= Duration::from_secs(1));
    }

    #[test]
    fn serializes_as_millis() {
        let p = RetryPolicy::new(3, Duration::from_millis(250), Duration::from_secs(2));
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(
            json,
            r#"{"max_attempts":3,"initial_backoff":250,"max_backoff":2000}"#
        );
    }
}
