//! Events emitted by the gate.

use crate::gate::{Caller, WaitReason};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use sumika_core::events::ScrapeEvent;

/// Events emitted by a [`crate::RateGate`].
#[derive(Debug)]
pub enum RateGateEvent {
    /// A caller was admitted, possibly after waiting.
    Admitted {
        gate_name: String,
        caller: Caller,
        waited: Duration,
        reason: WaitReason,
        timestamp: Instant,
    },
    /// A hostile response was signaled and the cooldown advanced.
    HostileSignaled {
        gate_name: String,
        reason: String,
        cooldown_until: DateTime<Utc>,
        timestamp: Instant,
    },
}

impl ScrapeEvent for RateGateEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateGateEvent::Admitted { .. } => "admitted",
            RateGateEvent::HostileSignaled { .. } => "hostile_signal",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateGateEvent::Admitted { timestamp, .. } => *timestamp,
            RateGateEvent::HostileSignaled { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            RateGateEvent::Admitted { gate_name, .. } => gate_name,
            RateGateEvent::HostileSignaled { gate_name, .. } => gate_name,
        }
    }
}
