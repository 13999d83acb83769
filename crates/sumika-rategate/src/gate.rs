use crate::config::RateGateConfig;
use crate::events::RateGateEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum sleep between re-checks, so boundary rounding cannot spin.
const RECHECK_FLOOR: Duration = Duration::from_millis(25);

/// Which component is asking for an admission.
///
/// The per-hour cap is shared across callers; the class only labels traces,
/// events, and the per-caller admission counters in [`RateGateStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    /// The queue worker fetching detail pages.
    Worker,
    /// The diff producer fetching index pages (scheduled or manual).
    Diff,
}

impl Caller {
    pub fn as_str(&self) -> &'static str {
        match self {
            Caller::Worker => "worker",
            Caller::Diff => "diff",
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an acquisition had to wait before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Admitted without waiting.
    None,
    /// The rolling 60-minute window was full.
    HourlyLimit,
    /// The randomized inter-fetch spacing had not elapsed.
    HumanPace,
    /// A hostile-response cooldown was in force.
    Cooldown,
}

impl WaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitReason::None => "none",
            WaitReason::HourlyLimit => "hourly_limit",
            WaitReason::HumanPace => "human_pace",
            WaitReason::Cooldown => "cooldown",
        }
    }
}

/// Point-in-time view of the gate for the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateGateStats {
    /// Admissions currently inside the rolling 60-minute window.
    pub per_window_used: usize,
    pub per_window_limit: usize,
    /// Set while a hostile-response cooldown is in force.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub worker_admissions: u64,
    pub diff_admissions: u64,
    pub hostile_signals: u64,
}

#[derive(Debug)]
struct GateState {
    /// Admission timestamps inside the last hour, oldest first. Shared by
    /// all callers: per-caller counts never reset this ring.
    ring: VecDeque<DateTime<Utc>>,
    /// Earliest instant the next admission may happen (human pace).
    next_allowed_at: Option<DateTime<Utc>>,
    /// While set and in the future, all acquisitions block.
    cooldown_until: Option<DateTime<Utc>>,
    worker_admissions: u64,
    diff_admissions: u64,
    hostile_signals: u64,
}

enum Decision {
    Admit,
    Wait(Duration, WaitReason),
}

/// The process-wide outbound-fetch gate. See the crate docs for the rules.
pub struct RateGate {
    config: RateGateConfig,
    state: Mutex<GateState>,
}

impl RateGate {
    pub(crate) fn new(config: RateGateConfig) -> Self {
        let capacity = config.per_hour_limit;
        Self {
            config,
            state: Mutex::new(GateState {
                ring: VecDeque::with_capacity(capacity),
                next_allowed_at: None,
                cooldown_until: None,
                worker_admissions: 0,
                diff_admissions: 0,
                hostile_signals: 0,
            }),
        }
    }

    /// Blocks until the caller is admitted. Never errors; the wait is
    /// unbounded and can exceed an hour during cooldown.
    pub async fn acquire(&self, caller: Caller) {
        let started = self.config.clock.now();
        let mut dominant = WaitReason::None;

        loop {
            let decision = {
                let mut state = self.state.lock().unwrap();
                self.evaluate(&mut state, caller)
            };

            match decision {
                Decision::Admit => {
                    let waited = duration_between(started, self.config.clock.now());
                    tracing::debug!(
                        gate = %self.config.name,
                        caller = caller.as_str(),
                        waited_ms = waited.as_millis() as u64,
                        reason = dominant.as_str(),
                        "fetch admitted"
                    );

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "rategate_admissions_total",
                        "gate" => self.config.name.clone(),
                        "caller" => caller.as_str()
                    )
                    .increment(1);

                    self.config.event_listeners.emit(&RateGateEvent::Admitted {
                        gate_name: self.config.name.clone(),
                        caller,
                        waited,
                        reason: dominant,
                        timestamp: Instant::now(),
                    });
                    return;
                }
                Decision::Wait(wait, reason) => {
                    dominant = reason;
                    tracing::trace!(
                        gate = %self.config.name,
                        caller = caller.as_str(),
                        wait_ms = wait.as_millis() as u64,
                        reason = reason.as_str(),
                        "fetch deferred"
                    );
                    self.config.clock.sleep(wait.max(RECHECK_FLOOR)).await;
                }
            }
        }
    }

    /// Arms the shared cooldown: no admission happens before
    /// `now + cooldown_on_hostile`. Repeated signals only ever push the
    /// deadline forward.
    pub fn signal_hostile(&self, reason: &str) {
        let now = self.config.clock.now();
        let proposed = now + chrono_duration(self.config.cooldown_on_hostile);

        let until = {
            let mut state = self.state.lock().unwrap();
            let until = match state.cooldown_until {
                Some(current) if current > proposed => current,
                _ => proposed,
            };
            state.cooldown_until = Some(until);
            state.hostile_signals += 1;
            until
        };

        tracing::warn!(
            gate = %self.config.name,
            reason,
            cooldown_until = %until,
            "hostile response signaled, cooling down"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "rategate_hostile_signals_total",
            "gate" => self.config.name.clone()
        )
        .increment(1);

        self.config
            .event_listeners
            .emit(&RateGateEvent::HostileSignaled {
                gate_name: self.config.name.clone(),
                reason: reason.to_string(),
                cooldown_until: until,
                timestamp: Instant::now(),
            });
    }

    /// Current window utilization and cooldown state.
    pub fn stats(&self) -> RateGateStats {
        let now = self.config.clock.now();
        let mut state = self.state.lock().unwrap();
        prune_ring(&mut state.ring, now);

        RateGateStats {
            per_window_used: state.ring.len(),
            per_window_limit: self.config.per_hour_limit,
            cooldown_until: state.cooldown_until.filter(|until| *until > now),
            worker_admissions: state.worker_admissions,
            diff_admissions: state.diff_admissions,
            hostile_signals: state.hostile_signals,
        }
    }

    fn evaluate(&self, state: &mut GateState, caller: Caller) -> Decision {
        let now = self.config.clock.now();

        // Rule 3 overrides everything else.
        if let Some(until) = state.cooldown_until {
            if until > now {
                return Decision::Wait(duration_between(now, until), WaitReason::Cooldown);
            }
        }

        // Rule 1: rolling hourly window.
        prune_ring(&mut state.ring, now);
        if state.ring.len() >= self.config.per_hour_limit {
            if let Some(&oldest) = state.ring.front() {
                let reopens = oldest + chrono::Duration::hours(1);
                return Decision::Wait(duration_between(now, reopens), WaitReason::HourlyLimit);
            }
        }

        // Rule 2: human pace.
        if let Some(next) = state.next_allowed_at {
            if next > now {
                return Decision::Wait(duration_between(now, next), WaitReason::HumanPace);
            }
        }

        // Admit: record the timestamp and draw the spacing for the NEXT one.
        state.ring.push_back(now);
        let spacing = self
            .config
            .pace
            .sample(self.config.human_pace_min, self.config.human_pace_max);
        state.next_allowed_at = Some(now + chrono_duration(spacing));
        match caller {
            Caller::Worker => state.worker_admissions += 1,
            Caller::Diff => state.diff_admissions += 1,
        }
        Decision::Admit
    }
}

fn prune_ring(ring: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let horizon = now - chrono::Duration::hours(1);
    while let Some(&front) = ring.front() {
        if front <= horizon {
            ring.pop_front();
        } else {
            break;
        }
    }
}

fn duration_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateGateConfig;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use sumika_core::clock::SimClock;
    use sumika_core::pace::FixedPace;
    use sumika_core::Clock;

    fn sim_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn gate_with(limit: usize, pace: Duration, clock: Arc<SimClock>) -> RateGate {
        RateGateConfig::builder()
            .name("test-gate")
            .per_hour_limit(limit)
            .human_pace(Duration::from_secs(45), Duration::from_secs(120))
            .pace_sampler(Arc::new(FixedPace(pace)))
            .clock(clock)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(5, Duration::ZERO, Arc::clone(&clock));

        gate.acquire(Caller::Worker).await;
        assert_eq!(clock.now(), sim_epoch());
        assert_eq!(gate.stats().per_window_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_pace_spaces_admissions() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(10, Duration::from_secs(60), Arc::clone(&clock));

        gate.acquire(Caller::Worker).await;
        gate.acquire(Caller::Worker).await;

        let elapsed = clock.now() - sim_epoch();
        assert!(
            elapsed >= chrono::Duration::seconds(60),
            "second admission came after only {elapsed}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_cap_blocks_until_oldest_ages_out() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(2, Duration::ZERO, Arc::clone(&clock));

        gate.acquire(Caller::Worker).await;
        gate.acquire(Caller::Worker).await;
        gate.acquire(Caller::Worker).await;

        let elapsed = clock.now() - sim_epoch();
        assert!(
            elapsed >= chrono::Duration::hours(1),
            "third admission should wait for the window, waited {elapsed}"
        );
        assert_eq!(gate.stats().per_window_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_is_collective_across_callers() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(2, Duration::ZERO, Arc::clone(&clock));

        gate.acquire(Caller::Worker).await;
        gate.acquire(Caller::Diff).await;
        // Third admission must wait regardless of which caller asks.
        gate.acquire(Caller::Worker).await;

        let elapsed = clock.now() - sim_epoch();
        assert!(elapsed >= chrono::Duration::hours(1));

        let stats = gate.stats();
        assert_eq!(stats.worker_admissions, 2);
        assert_eq!(stats.diff_admissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_all_acquisitions() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = RateGateConfig::builder()
            .per_hour_limit(5)
            .cooldown_on_hostile(Duration::from_secs(3600))
            .pace_sampler(Arc::new(FixedPace(Duration::ZERO)))
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build()
            .unwrap();

        gate.signal_hostile("test hostile");
        gate.acquire(Caller::Diff).await;

        let elapsed = clock.now() - sim_epoch();
        assert!(
            elapsed >= chrono::Duration::hours(1),
            "acquisition should have waited out the cooldown, waited {elapsed}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_hostile_signals_advance_cooldown() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(5, Duration::ZERO, Arc::clone(&clock));

        gate.signal_hostile("first");
        let first = gate.stats().cooldown_until.unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        gate.signal_hostile("second");
        let second = gate.stats().cooldown_until.unwrap();

        assert!(second > first, "cooldown must advance on each signal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_event_carries_wait_reason() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let paced = Arc::new(AtomicUsize::new(0));
        let paced_clone = Arc::clone(&paced);

        let gate = RateGateConfig::builder()
            .per_hour_limit(10)
            .pace_sampler(Arc::new(FixedPace(Duration::from_secs(60))))
            .clock(clock)
            .on_admitted(move |_caller, _waited, reason| {
                if reason == WaitReason::HumanPace {
                    paced_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        gate.acquire(Caller::Worker).await;
        gate.acquire(Caller::Worker).await;

        assert_eq!(paced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_cap_over_24h_simulation() {
        let clock = Arc::new(SimClock::new(sim_epoch()));
        let gate = gate_with(5, Duration::from_secs(60), Arc::clone(&clock));

        let mut admissions: Vec<DateTime<Utc>> = Vec::new();
        let deadline = sim_epoch() + chrono::Duration::hours(24);
        while clock.now() < deadline {
            gate.acquire(Caller::Worker).await;
            admissions.push(clock.now());
        }

        // Every rolling hour holds at most 5 admissions.
        for (i, &start) in admissions.iter().enumerate() {
            let in_window = admissions[i..]
                .iter()
                .take_while(|&&t| t - start < chrono::Duration::hours(1))
                .count();
            assert!(
                in_window <= 5,
                "window starting at {start} admitted {in_window}"
            );
        }

        // Human-pace lower bound holds between consecutive admissions.
        for pair in admissions.windows(2) {
            assert!(pair[1] - pair[0] >= chrono::Duration::seconds(60));
        }
    }
}
