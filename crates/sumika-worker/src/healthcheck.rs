//! Startup probe of the origin.
//!
//! The worker does not consume the queue until one probe of a benign index
//! URL comes back clean. Hostile probes cool the whole system down on an
//! escalating schedule; the total pre-run delay is bounded, after which
//! startup fails loudly instead of hammering a hostile origin.

use std::sync::Arc;
use std::time::Duration;
use sumika_core::clock::Clock;
use sumika_extract::{IndexScanOutcome, IndexScanner};
use sumika_rategate::{Caller, RateGate};
use thiserror::Error;

/// Pause before re-probing after a non-hostile (network/5xx) failure.
const TRANSIENT_RETRY_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum HealthcheckError {
    #[error("healthcheck url is not configured")]
    MissingUrl,

    #[error("healthcheck url {0} does not exist at the origin")]
    ProbeMissing(String),

    #[error("origin still unhealthy after {attempts} probes spanning {total:?}")]
    Exhausted { attempts: usize, total: Duration },
}

#[derive(Debug, Clone)]
pub struct HealthcheckConfig {
    /// Benign index URL to probe.
    pub url: String,
    /// Pre-run cooldowns after the 1st, 2nd, 3rd+ consecutive hostile probe.
    pub cooldowns_on_fail: Vec<Duration>,
    /// Hard bound on the total pre-run delay.
    pub max_total_delay: Duration,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cooldowns_on_fail: vec![
                Duration::from_secs(4 * 60 * 60),
                Duration::from_secs(4 * 60 * 60),
                Duration::from_secs(12 * 60 * 60),
            ],
            max_total_delay: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct Healthcheck {
    gate: Arc<RateGate>,
    scanner: Arc<dyn IndexScanner>,
    clock: Arc<dyn Clock>,
    config: HealthcheckConfig,
}

impl Healthcheck {
    pub fn new(
        gate: Arc<RateGate>,
        scanner: Arc<dyn IndexScanner>,
        clock: Arc<dyn Clock>,
        config: HealthcheckConfig,
    ) -> Self {
        Self {
            gate,
            scanner,
            clock,
            config,
        }
    }

    /// Probes until the origin answers cleanly or the delay budget runs out.
    /// Probes are fetches: each one goes through the gate.
    pub async fn run(&self) -> Result<(), HealthcheckError> {
        if self.config.url.is_empty() {
            return Err(HealthcheckError::MissingUrl);
        }

        let mut total_delay = Duration::ZERO;
        let mut hostile_probes = 0usize;

        loop {
            self.gate.acquire(Caller::Worker).await;
            match self.scanner.scan_index(&self.config.url).await {
                IndexScanOutcome::Candidates(found) => {
                    tracing::info!(
                        url = %self.config.url,
                        tokens = found.len(),
                        "healthcheck passed"
                    );
                    return Ok(());
                }
                IndexScanOutcome::Missing => {
                    return Err(HealthcheckError::ProbeMissing(self.config.url.clone()));
                }
                IndexScanOutcome::Hostile => {
                    self.gate.signal_hostile("healthcheck probe rejected");
                    let pause = self
                        .config
                        .cooldowns_on_fail
                        .get(hostile_probes)
                        .or(self.config.cooldowns_on_fail.last())
                        .copied()
                        .unwrap_or(Duration::from_secs(4 * 60 * 60));
                    hostile_probes += 1;
                    total_delay += pause;
                    if total_delay > self.config.max_total_delay {
                        return Err(HealthcheckError::Exhausted {
                            attempts: hostile_probes,
                            total: total_delay,
                        });
                    }
                    tracing::warn!(
                        probe = hostile_probes,
                        pause_secs = pause.as_secs(),
                        "healthcheck hostile; extending pre-run cooldown"
                    );
                    self.clock.sleep(pause).await;
                }
                IndexScanOutcome::Transient(e) => {
                    total_delay += TRANSIENT_RETRY_PAUSE;
                    if total_delay > self.config.max_total_delay {
                        return Err(HealthcheckError::Exhausted {
                            attempts: hostile_probes,
                            total: total_delay,
                        });
                    }
                    tracing::warn!(error = %e, "healthcheck probe failed; retrying shortly");
                    self.clock.sleep(TRANSIENT_RETRY_PAUSE).await;
                }
            }
        }
    }
}
