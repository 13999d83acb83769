use crate::events::RateGateEvent;
use crate::gate::{Caller, RateGate, WaitReason};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use sumika_core::clock::{Clock, SystemClock};
use sumika_core::events::{EventListeners, FnListener};
use sumika_core::pace::{PaceSampler, UniformPace};
use thiserror::Error;

/// Configuration rejected at build time.
///
/// The system refuses to start on a bad gate configuration rather than
/// silently degrading.
#[derive(Debug, Error)]
pub enum RateGateConfigError {
    #[error("per_hour_limit must be at least 1")]
    ZeroLimit,

    #[error("human pace range is inverted: min {min:?} > max {max:?}")]
    InvertedPace { min: Duration, max: Duration },
}

/// Configuration for a [`RateGate`].
pub struct RateGateConfig {
    pub(crate) name: String,
    pub(crate) per_hour_limit: usize,
    pub(crate) human_pace_min: Duration,
    pub(crate) human_pace_max: Duration,
    pub(crate) cooldown_on_hostile: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pace: Arc<dyn PaceSampler>,
    pub(crate) event_listeners: EventListeners<RateGateEvent>,
}

impl RateGateConfig {
    /// Creates a builder with the operational defaults: 5 fetches per hour,
    /// 45–120 s human pace, 1 h cooldown on hostile.
    pub fn builder() -> RateGateConfigBuilder {
        RateGateConfigBuilder::new()
    }
}

/// Builder for [`RateGateConfig`].
pub struct RateGateConfigBuilder {
    name: String,
    per_hour_limit: usize,
    human_pace_min: Duration,
    human_pace_max: Duration,
    cooldown_on_hostile: Duration,
    clock: Arc<dyn Clock>,
    pace: Arc<dyn PaceSampler>,
    event_listeners: EventListeners<RateGateEvent>,
}

impl Default for RateGateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGateConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            per_hour_limit: 5,
            human_pace_min: Duration::from_secs(45),
            human_pace_max: Duration::from_secs(120),
            cooldown_on_hostile: Duration::from_secs(3600),
            clock: Arc::new(SystemClock),
            pace: Arc::new(UniformPace),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this gate instance (used in events and traces).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Maximum admissions within any rolling 60-minute window, across all
    /// callers collectively.
    pub fn per_hour_limit(mut self, limit: usize) -> Self {
        self.per_hour_limit = limit;
        self
    }

    /// Range for the randomized spacing imposed after each admission.
    pub fn human_pace(mut self, min: Duration, max: Duration) -> Self {
        self.human_pace_min = min;
        self.human_pace_max = max;
        self
    }

    /// How long [`RateGate::signal_hostile`] blocks all admissions.
    pub fn cooldown_on_hostile(mut self, cooldown: Duration) -> Self {
        self.cooldown_on_hostile = cooldown;
        self
    }

    /// Injects a clock. Tests pair this with a simulated clock and paused
    /// tokio time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Injects the pace sampler that draws the post-admission spacing.
    pub fn pace_sampler(mut self, pace: Arc<dyn PaceSampler>) -> Self {
        self.pace = pace;
        self
    }

    /// Registers a callback invoked on every admission with the caller, the
    /// total time waited, and the dominant wait reason.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(Caller, Duration, WaitReason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateGateEvent::Admitted {
                caller,
                waited,
                reason,
                ..
            } = event
            {
                f(*caller, *waited, *reason);
            }
        }));
        self
    }

    /// Registers a callback invoked whenever a hostile response is signaled,
    /// with the new cooldown deadline.
    pub fn on_hostile_signal<F>(mut self, f: F) -> Self
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateGateEvent::HostileSignaled { cooldown_until, .. } = event {
                f(*cooldown_until);
            }
        }));
        self
    }

    /// Validates and builds the gate.
    pub fn build(self) -> Result<RateGate, RateGateConfigError> {
        if self.per_hour_limit == 0 {
            return Err(RateGateConfigError::ZeroLimit);
        }
        if self.human_pace_min > self.human_pace_max {
            return Err(RateGateConfigError::InvertedPace {
                min: self.human_pace_min,
                max: self.human_pace_max,
            });
        }

        Ok(RateGate::new(RateGateConfig {
            name: self.name,
            per_hour_limit: self.per_hour_limit,
            human_pace_min: self.human_pace_min,
            human_pace_max: self.human_pace_max,
            cooldown_on_hostile: self.cooldown_on_hostile,
            clock: self.clock,
            pace: self.pace,
            event_listeners: self.event_listeners,
        }))
    }
}
