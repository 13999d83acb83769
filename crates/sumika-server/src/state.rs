use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use sumika_rategate::RateGate;
use sumika_store::{PropertyStore, QueueStore};
use sumika_worker::DiffProducer;

/// Shared handles behind the control surface.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueStore>,
    pub properties: Arc<dyn PropertyStore>,
    pub gate: Arc<RateGate>,
    pub diff: Arc<DiffProducer>,
    /// The scheduler's URL set, for the manual run-now trigger.
    pub index_urls: Arc<Vec<String>>,
    /// Flipped by the worker once its healthcheck passes.
    pub is_running: Arc<AtomicBool>,
}
