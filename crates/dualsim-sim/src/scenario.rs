use crate::device::{LinkCondition, SimDevice};
use dualsim_common::models::SlotIndex;
use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;

/// Configuration for a deterministic link-quality scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration: Duration,
    pub step: Duration,
    /// One entry per slot, in slot order.
    pub slots: [SlotScenarioConfig; 2],
}

/// Per-slot signal walk and outage behaviour.
#[derive(Debug, Clone)]
pub struct SlotScenarioConfig {
    /// Signal ordinal 0–4 at t=0.
    pub start_signal: u8,
    /// Chance per step that the signal moves one ordinal up or down.
    pub signal_drift: f64,
    /// Chance per step that a healthy link goes down.
    pub outage_probability: f64,
    /// Chance per step that a down link comes back.
    pub recovery_probability: f64,
    /// Share of outages where the OS still reports a validated network.
    pub black_hole_share: f64,
}

impl Default for SlotScenarioConfig {
    fn default() -> Self {
        Self {
            start_signal: 3,
            signal_drift: 0.3,
            outage_probability: 0.05,
            recovery_probability: 0.25,
            black_hole_share: 0.3,
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            duration: Duration::from_secs(120),
            step: Duration::from_secs(1),
            slots: [SlotScenarioConfig::default(), SlotScenarioConfig::default()],
        }
    }
}

/// A single time-step of link conditions for both slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioFrame {
    pub t: Duration,
    pub conditions: [LinkCondition; 2],
}

impl ScenarioFrame {
    /// Make `device` report this frame's conditions from now on.
    pub fn apply(&self, device: &SimDevice) {
        for slot in SlotIndex::ALL {
            device.set_condition(slot, self.conditions[slot.get() as usize]);
        }
    }
}

/// Deterministic random-walk generator for per-slot link quality.
///
/// The same seed always yields the same frames: each slot's signal drifts
/// by one ordinal at a time, and outages start and end as independent coin
/// flips.
#[derive(Debug)]
pub struct Scenario {
    cfg: ScenarioConfig,
    rng: StdRng,
    states: [SlotState; 2],
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    signal: u8,
    outage: Option<Outage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outage {
    Dead,
    BlackHole,
}

impl Scenario {
    pub fn new(cfg: ScenarioConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        let state = |slot: &SlotScenarioConfig| SlotState {
            signal: slot.start_signal.min(4),
            outage: None,
        };
        let states = [state(&cfg.slots[0]), state(&cfg.slots[1])];
        Self { cfg, rng, states }
    }

    pub fn frames(&mut self) -> Vec<ScenarioFrame> {
        let total_steps =
            (self.cfg.duration.as_secs_f64() / self.cfg.step.as_secs_f64()).ceil() as u64;
        let mut frames = Vec::with_capacity(total_steps as usize + 1);

        for step_idx in 0..=total_steps {
            let t = self.cfg.step.mul_f64(step_idx as f64);
            let conditions = [self.advance(0), self.advance(1)];
            frames.push(ScenarioFrame { t, conditions });
        }

        frames
    }

    fn advance(&mut self, idx: usize) -> LinkCondition {
        let slot_cfg = self.cfg.slots[idx].clone();
        let state = &mut self.states[idx];

        if self.rng.random::<f64>() < slot_cfg.signal_drift {
            state.signal = if self.rng.random::<bool>() {
                (state.signal + 1).min(4)
            } else {
                state.signal.saturating_sub(1)
            };
        }

        state.outage = match state.outage {
            Some(kind) if self.rng.random::<f64>() >= slot_cfg.recovery_probability => Some(kind),
            Some(_) => None,
            None if self.rng.random::<f64>() < slot_cfg.outage_probability => {
                if self.rng.random::<f64>() < slot_cfg.black_hole_share {
                    Some(Outage::BlackHole)
                } else {
                    Some(Outage::Dead)
                }
            }
            None => None,
        };

        match state.outage {
            Some(Outage::Dead) => LinkCondition::dead(),
            Some(Outage::BlackHole) => LinkCondition::black_hole(),
            None => LinkCondition::with_signal(state.signal),
        }
    }
}
