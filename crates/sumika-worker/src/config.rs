use std::time::Duration;
use sumika_store::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerConfigError {
    #[error("invalid retry policy: {0}")]
    RetryPolicy(String),

    #[error("preventive_pause_every must be at least 1")]
    ZeroPreventiveInterval,

    #[error("hostile pause schedule must not be empty")]
    EmptyHostileSchedule,
}

/// Worker loop tuning. Everything here is operational data; the loop logic
/// never hardcodes a duration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle poll interval when the queue has nothing eligible.
    pub poll_interval: Duration,
    /// Backoff table and attempts ceiling for transient failures.
    pub retry_policy: RetryPolicy,
    /// Sleep an extra `preventive_pause` after this many consecutive
    /// successes, to break periodicity.
    pub preventive_pause_every: u32,
    pub preventive_pause: Duration,
    /// Worker-side pauses after the 1st, 2nd, 3rd+ hostile response inside
    /// `hostile_window`.
    pub hostile_pauses: Vec<Duration>,
    pub hostile_window: Duration,
    /// Leak reaper threshold: `processing` rows untouched longer than this
    /// return to `pending`.
    pub stale_processing_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            preventive_pause_every: 3,
            preventive_pause: Duration::from_secs(300),
            hostile_pauses: vec![
                Duration::from_secs(300),
                Duration::from_secs(4 * 60 * 60),
                Duration::from_secs(12 * 60 * 60),
            ],
            hostile_window: Duration::from_secs(4 * 60 * 60),
            stale_processing_after: Duration::from_secs(60 * 60),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerConfigError> {
        self.retry_policy
            .validate()
            .map_err(|e| WorkerConfigError::RetryPolicy(e.to_string()))?;
        if self.preventive_pause_every == 0 {
            return Err(WorkerConfigError::ZeroPreventiveInterval);
        }
        if self.hostile_pauses.is_empty() {
            return Err(WorkerConfigError::EmptyHostileSchedule);
        }
        Ok(())
    }
}
