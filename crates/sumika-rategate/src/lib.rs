//! The single gate every outbound fetch to the origin must pass through.
//!
//! The gate enforces three rules, in order:
//!
//! 1. A sliding per-hour cap shared by all callers.
//! 2. A randomized human-pace spacing between admissions.
//! 3. A cooldown override armed by [`RateGate::signal_hostile`] that blocks
//!    everything until it elapses.
//!
//! There is exactly one gate per process. It is constructed at startup and
//! handed to the worker and the diff producer by explicit injection; no code
//! path may fetch from the origin without calling [`RateGate::acquire`]
//! first.
//!
//! # Example
//!
//! ```rust,no_run
//! use sumika_rategate::{Caller, RateGateConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let gate = RateGateConfig::builder()
//!     .name("origin")
//!     .per_hour_limit(5)
//!     .human_pace(Duration::from_secs(45), Duration::from_secs(120))
//!     .build()
//!     .unwrap();
//!
//! gate.acquire(Caller::Worker).await;
//! // ... perform the fetch ...
//! # }
//! ```

mod config;
mod events;
mod gate;

pub use config::{RateGateConfig, RateGateConfigBuilder, RateGateConfigError};
pub use events::RateGateEvent;
pub use gate::{Caller, RateGate, RateGateStats, WaitReason};
