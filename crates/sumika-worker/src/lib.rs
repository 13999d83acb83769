//! The orchestration layer: the single queue consumer, its startup
//! healthcheck, the index diff producer, and the daily scheduler.
//!
//! Control flow: the scheduler (or a manual HTTP trigger) drives the
//! [`DiffProducer`], which fills the queue. The [`Worker`] drains it, one
//! item at a time, through the rate gate. Exactly one worker runs per
//! process; spawning more silently violates the outbound budget and is a
//! configuration error.

mod config;
mod diff;
mod healthcheck;
mod scheduler;
mod worker;

pub use config::{WorkerConfig, WorkerConfigError};
pub use diff::{DiffProducer, DiffSummary};
pub use healthcheck::{Healthcheck, HealthcheckConfig, HealthcheckError};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::{Worker, WorkerError};
