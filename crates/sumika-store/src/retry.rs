//! Retry schedule for transient failures.
//!
//! The schedule is data, not code: operators tune the table without touching
//! transition logic.

use crate::error::StoreError;
use std::time::Duration;

/// How a transient failure should be disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transition to `failed`, eligible again after `delay`.
    Retry { delay: Duration },
    /// Attempts ceiling reached: transition to `permanent_fail`.
    Exhausted,
}

/// Attempt ceiling plus the backoff table indexed by attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// `backoff[n-1]` is the delay applied after the n-th failed attempt.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: vec![
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
                Duration::from_secs(60 * 60),
                Duration::from_secs(4 * 60 * 60),
                Duration::from_secs(12 * 60 * 60),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// The schedule length and the attempts ceiling are two knobs that must
    /// agree; checked at startup so a mismatch refuses to run instead of
    /// silently mis-indexing.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_attempts == 0 {
            return Err(StoreError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff.len() != self.max_attempts as usize {
            return Err(StoreError::InvalidRetryPolicy(format!(
                "backoff schedule has {} entries but max_attempts is {}",
                self.backoff.len(),
                self.max_attempts
            )));
        }
        Ok(())
    }

    /// Disposition for a transient failure on a row that already carries
    /// `prior_attempts` failed tries.
    pub fn disposition(&self, prior_attempts: u32) -> Disposition {
        let attempts = prior_attempts + 1;
        if attempts >= self.max_attempts {
            return Disposition::Exhausted;
        }
        let delay = self
            .backoff
            .get((attempts - 1) as usize)
            .copied()
            .unwrap_or_else(|| self.backoff.last().copied().unwrap_or(Duration::ZERO));
        Disposition::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_matches_operational_table() {
        let policy = RetryPolicy::default();
        policy.validate().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff[0], Duration::from_secs(300));
        assert_eq!(policy.backoff[4], Duration::from_secs(43_200));
    }

    #[test]
    fn test_first_failure_gets_first_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.disposition(0),
            Disposition::Retry {
                delay: Duration::from_secs(300)
            }
        );
    }

    #[test]
    fn test_attempt_crossing_ceiling_is_exhausted() {
        let policy = RetryPolicy::default();
        // Row carries 4 attempts; the 5th crosses the ceiling.
        assert_eq!(policy.disposition(4), Disposition::Exhausted);
    }

    #[test]
    fn test_mismatched_schedule_rejected() {
        let policy = RetryPolicy::new(5, vec![Duration::from_secs(60)]);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let policy = RetryPolicy::new(0, vec![]);
        assert!(policy.validate().is_err());
    }
}
