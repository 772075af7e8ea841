//! # Monitor
//!
//! The single-writer half of the coordinator: owns [`MonitorState`] and the
//! [`LossDetector`], consumes [`Input`]s in arrival order and answers with
//! [`Action`]s for the runtime to carry out. Nothing here blocks or does
//! I/O, so every interleaving of ticks, push events and worker results can
//! be replayed deterministically in tests.
//!
//! Work handed to the worker carries the epoch current at dispatch. Every
//! start and stop bumps the epoch; results that come back with an older one
//! are dropped without touching state.

use std::sync::Arc;

use quanta::Instant;
use tracing::{debug, info, warn};

use dualsim_common::ids;
use dualsim_common::models::{DetectorState, Quality, SlotIndex};
use dualsim_common::protocol::FailoverEvent;

use crate::config::MonitorConfig;
use crate::error::FailoverError;
use crate::health::{LossDetector, LossSignal, ProbeReport, Transition};
use crate::metrics::FailoverMetrics;
use crate::policy::SkipReason;
use crate::switcher::SwitchSuccess;

/// Monitoring session state. Reset on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub is_monitoring: bool,
    pub primary: Option<SlotIndex>,
    pub fallback: Option<SlotIndex>,
    pub last_switch_at: Option<Instant>,
    /// `mon_<uuid7>` of the running session, for log correlation.
    pub session: Option<String>,
}

/// What an automatic failover needs, captured at dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverJob {
    pub primary: SlotIndex,
    pub fallback: SlotIndex,
    /// Cached active slot; the worker prefers a fresh read.
    pub current: Option<SlotIndex>,
    pub last_switch_at: Option<Instant>,
}

/// Result of a failover job.
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverOutcome {
    Switched(SwitchSuccess),
    Skipped {
        reason: SkipReason,
        current: Option<SlotIndex>,
    },
    Failed(FailoverError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Tick,
    Push {
        available: bool,
    },
    ProbeDone {
        epoch: u64,
        report: ProbeReport,
        current_slot: Option<SlotIndex>,
    },
    FailoverDone {
        epoch: u64,
        outcome: FailoverOutcome,
    },
    /// An explicit switch was verified.
    ManualSwitched(SwitchSuccess),
    /// An explicit switch left the worker, successful or not.
    ManualFinished,
    /// An explicit switch was handed to the worker.
    ManualStarted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StartProbe { epoch: u64 },
    StartFailover { epoch: u64, job: FailoverJob },
    Emit(FailoverEvent),
}

/// Read-only view for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorView {
    pub state: MonitorState,
    pub loss_count: u32,
    pub detector_state: DetectorState,
    pub last_good_slot: Option<SlotIndex>,
    pub current_slot: Option<SlotIndex>,
    pub epoch: u64,
}

pub struct Monitor {
    detector: LossDetector,
    state: MonitorState,
    current_slot: Option<SlotIndex>,
    epoch: u64,
    probe_in_flight: bool,
    failover_in_flight: bool,
    manual_in_flight: u32,
    metrics: Arc<FailoverMetrics>,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, metrics: Arc<FailoverMetrics>) -> Self {
        Monitor {
            detector: LossDetector::new(config.loss_threshold),
            state: MonitorState::default(),
            current_slot: None,
            epoch: 0,
            probe_in_flight: false,
            failover_in_flight: false,
            manual_in_flight: 0,
            metrics,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.state.is_monitoring
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// No probe, failover or explicit switch is outstanding.
    pub fn is_idle(&self) -> bool {
        !self.probe_in_flight && !self.failover_in_flight && self.manual_in_flight == 0
    }

    pub fn view(&self) -> MonitorView {
        MonitorView {
            state: self.state.clone(),
            loss_count: self.detector.loss_count(),
            detector_state: self.detector.state(),
            last_good_slot: self.detector.last_good_slot(),
            current_slot: self.current_slot,
            epoch: self.epoch,
        }
    }

    /// Begin a fresh session. The first probe is dispatched immediately.
    pub fn start(&mut self, primary: SlotIndex, fallback: SlotIndex) -> Vec<Action> {
        self.epoch += 1;
        self.detector.reset();
        self.probe_in_flight = false;
        self.failover_in_flight = false;
        let session = ids::session_id();
        info!(
            session = %session,
            primary = %primary,
            fallback = %fallback,
            epoch = self.epoch,
            "monitoring started"
        );
        self.state = MonitorState {
            is_monitoring: true,
            primary: Some(primary),
            fallback: Some(fallback),
            last_switch_at: None,
            session: Some(session),
        };
        self.dispatch_probe()
    }

    /// End the session. Idempotent; in-flight results become stale.
    pub fn stop(&mut self) {
        if !self.state.is_monitoring {
            return;
        }
        self.epoch += 1;
        self.state.is_monitoring = false;
        self.probe_in_flight = false;
        self.failover_in_flight = false;
        info!(session = ?self.state.session, epoch = self.epoch, "monitoring stopped");
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        match input {
            Input::Tick => {
                if !self.state.is_monitoring {
                    return Vec::new();
                }
                if self.probe_in_flight {
                    debug!("previous probe still running, skipping tick");
                    return Vec::new();
                }
                self.dispatch_probe()
            }
            Input::Push { available } => {
                if !self.state.is_monitoring {
                    return Vec::new();
                }
                self.metrics.record_push();
                let signal = if available {
                    LossSignal::PushAvailable
                } else {
                    LossSignal::PushLost
                };
                debug!(available, "push event");
                self.apply_signal(signal)
            }
            Input::ProbeDone {
                epoch,
                report,
                current_slot,
            } => {
                if epoch != self.epoch {
                    return self.discard("probe", epoch);
                }
                self.probe_in_flight = false;
                self.metrics.record_sample();
                if current_slot.is_some() {
                    self.current_slot = current_slot;
                }
                debug!(quality = %report.quality, slot = ?self.current_slot, "sample");
                self.apply_signal(LossSignal::sample(
                    report.quality,
                    report.reachability_failed(),
                ))
            }
            Input::FailoverDone { epoch, outcome } => {
                if epoch != self.epoch {
                    return self.discard("failover", epoch);
                }
                self.failover_in_flight = false;
                self.apply_failover(outcome, now)
            }
            Input::ManualStarted => {
                self.manual_in_flight += 1;
                Vec::new()
            }
            Input::ManualSwitched(success) => {
                self.current_slot = Some(success.target);
                if !success.was_noop() {
                    self.state.last_switch_at = Some(now);
                    self.metrics.record_manual_switch();
                }
                vec![Action::Emit(FailoverEvent::sim_switched(success.target))]
            }
            Input::ManualFinished => {
                self.manual_in_flight = self.manual_in_flight.saturating_sub(1);
                Vec::new()
            }
        }
    }

    fn dispatch_probe(&mut self) -> Vec<Action> {
        self.probe_in_flight = true;
        vec![Action::StartProbe { epoch: self.epoch }]
    }

    fn discard(&self, what: &'static str, epoch: u64) -> Vec<Action> {
        debug!(what, epoch, current = self.epoch, "discarding stale result");
        self.metrics.record_stale_result();
        Vec::new()
    }

    fn apply_signal(&mut self, signal: LossSignal) -> Vec<Action> {
        if matches!(
            signal,
            LossSignal::PushLost
                | LossSignal::Sample {
                    quality: Quality::None,
                    ..
                }
        ) {
            self.metrics.record_loss_signal();
            warn!(
                loss_count = self.detector.loss_count() + 1,
                threshold = self.detector.threshold(),
                "loss signal"
            );
        }

        match self.detector.update(signal, self.current_slot) {
            None => Vec::new(),
            Some(Transition::Restored { slot }) => {
                info!(slot = %slot, "network restored");
                self.metrics.record_restored();
                vec![Action::Emit(FailoverEvent::network_restored(slot))]
            }
            Some(Transition::Lost { slot }) => {
                self.metrics.record_lost();
                warn!(slot = ?slot, "network lost");
                self.detector.acknowledge_loss();
                self.dispatch_failover()
            }
        }
    }

    fn dispatch_failover(&mut self) -> Vec<Action> {
        let (Some(primary), Some(fallback)) = (self.state.primary, self.state.fallback) else {
            return Vec::new();
        };
        if self.failover_in_flight || self.manual_in_flight > 0 {
            debug!("switch already in progress, not dispatching failover");
            return Vec::new();
        }
        self.failover_in_flight = true;
        vec![Action::StartFailover {
            epoch: self.epoch,
            job: FailoverJob {
                primary,
                fallback,
                current: self.current_slot,
                last_switch_at: self.state.last_switch_at,
            },
        }]
    }

    fn apply_failover(&mut self, outcome: FailoverOutcome, now: Instant) -> Vec<Action> {
        match outcome {
            FailoverOutcome::Switched(success) => {
                self.current_slot = Some(success.target);
                if success.was_noop() {
                    return Vec::new();
                }
                let from = success.previous.unwrap_or_else(|| success.target.other());
                self.state.last_switch_at = Some(now);
                self.detector.acknowledge_loss();
                self.metrics.record_auto_switch();
                info!(
                    from = %from,
                    to = %success.target,
                    strategy = ?success.strategy,
                    "automatic failover complete"
                );
                vec![Action::Emit(FailoverEvent::auto_switched(from, success.target))]
            }
            FailoverOutcome::Skipped { reason, current } => {
                if current.is_some() {
                    self.current_slot = current;
                }
                self.metrics.record_skip(&reason);
                info!(?reason, "failover skipped");
                Vec::new()
            }
            FailoverOutcome::Failed(err) => {
                self.metrics.record_switch_failure();
                warn!(error = %err, code = err.code(), "automatic failover failed, still monitoring");
                Vec::new()
            }
        }
    }
}
