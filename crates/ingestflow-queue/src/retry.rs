//! Retry policy for queue message redelivery, grounded in
//! `durable::reliability::retry::RetryPolicy`. Adapted so retry decisions
//! are driven by `ingestflow_core::error::ErrorClass` rather than a
//! free-form non-retryable-error-type list: the pipeline already has a
//! typed error taxonomy (spec §7), so reusing that instead of a string
//! denylist is the natural fit here.

use std::time::Duration;

use ingestflow_core::error::ErrorClass;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Jitter factor (0.0-1.0): +/- this fraction of the capped delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay before retrying the given 1-based attempt number. Attempt 1
    /// (the first delivery) has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry_num = attempt - 1;
        let base =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// spec §7: `ErrorClass` alone decides whether a failure is retried
    /// inline, escalated straight to dead-letter, or neither (abandonment).
    pub fn should_retry(&self, class: ErrorClass, current_attempt: u32) -> bool {
        class.is_retryable_inline() && self.has_attempts_remaining(current_attempt)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy::exponential().with_max_interval(Duration::from_secs(3600));
        let policy = RetryPolicy { jitter: 0.0, ..policy };

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
    }

    #[test]
    fn delay_caps_at_max_interval() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential().with_max_interval(Duration::from_secs(5))
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn permanent_remote_never_retries_inline() {
        let policy = RetryPolicy::exponential();
        assert!(!policy.should_retry(ErrorClass::PermanentRemote, 1));
    }

    #[test]
    fn transient_remote_retries_until_exhausted() {
        let policy = RetryPolicy::exponential().with_max_attempts(3);
        assert!(policy.should_retry(ErrorClass::TransientRemote, 1));
        assert!(policy.should_retry(ErrorClass::TransientRemote, 2));
        assert!(!policy.should_retry(ErrorClass::TransientRemote, 3));
    }
}
