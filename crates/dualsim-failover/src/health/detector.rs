//! # Loss Detector
//!
//! Hysteresis over the stream of probe verdicts and OS push notifications.
//!
//! ```text
//!   Unknown ──► Healthy ◄──► Degraded ──► Lost
//!                  ▲                        │
//!                  └──────── restore ───────┘
//! ```
//!
//! Negative signals (a `None` verdict, a "lost" push) bump a single counter;
//! reaching the threshold declares the link lost. Any healthy signal resets
//! the counter. A `Poor` verdict whose ping also failed is a soft signal: it
//! bumps the counter but never trips the threshold on its own.
//!
//! The detector has no clock and no I/O. It is driven by the coordinator,
//! which is its only writer.

use dualsim_common::models::{DetectorState, Quality, SlotIndex};

/// One input to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossSignal {
    /// A probe verdict, with whether the host reachability check failed.
    Sample {
        quality: Quality,
        reachability_failed: bool,
    },
    /// The OS reported a network as available.
    PushAvailable,
    /// The OS reported the network as lost.
    PushLost,
}

impl LossSignal {
    pub fn sample(quality: Quality, reachability_failed: bool) -> Self {
        LossSignal::Sample {
            quality,
            reachability_failed,
        }
    }

    fn weight(self) -> SignalWeight {
        match self {
            LossSignal::PushAvailable => SignalWeight::Healthy,
            LossSignal::PushLost => SignalWeight::Loss,
            LossSignal::Sample { quality, .. } if quality.is_healthy() => SignalWeight::Healthy,
            LossSignal::Sample {
                quality: Quality::None,
                ..
            } => SignalWeight::Loss,
            LossSignal::Sample {
                reachability_failed: true,
                ..
            } => SignalWeight::SoftLoss,
            // Poor with reachability intact or unchecked.
            LossSignal::Sample { .. } => SignalWeight::Healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalWeight {
    Healthy,
    Loss,
    SoftLoss,
}

/// Stable transitions surfaced to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The threshold was reached on `slot` (if the active slot is known).
    Lost { slot: Option<SlotIndex> },
    /// Connectivity came back on a different slot than the last good one.
    Restored { slot: SlotIndex },
}

#[derive(Debug, Clone)]
pub struct LossDetector {
    threshold: u32,
    state: DetectorState,
    loss_count: u32,
    last_good_slot: Option<SlotIndex>,
}

impl LossDetector {
    pub fn new(threshold: u32) -> Self {
        LossDetector {
            threshold: threshold.max(1),
            state: DetectorState::Unknown,
            loss_count: 0,
            last_good_slot: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn loss_count(&self) -> u32 {
        self.loss_count
    }

    pub fn last_good_slot(&self) -> Option<SlotIndex> {
        self.last_good_slot
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Feed one signal observed while `current_slot` carries data.
    pub fn update(
        &mut self,
        signal: LossSignal,
        current_slot: Option<SlotIndex>,
    ) -> Option<Transition> {
        match signal.weight() {
            SignalWeight::Healthy => self.on_healthy(current_slot),
            SignalWeight::Loss => {
                self.bump();
                if self.loss_count >= self.threshold {
                    self.state = DetectorState::Lost;
                    Some(Transition::Lost { slot: current_slot })
                } else {
                    None
                }
            }
            SignalWeight::SoftLoss => {
                self.bump();
                None
            }
        }
    }

    /// The policy consumed a `Lost` transition. Counting starts over so the
    /// next tick does not re-trigger; the state stays `Lost` until a healthy
    /// signal arrives.
    pub fn acknowledge_loss(&mut self) {
        self.loss_count = 0;
    }

    /// Back to the initial state. Used when monitoring (re)starts.
    pub fn reset(&mut self) {
        self.state = DetectorState::Unknown;
        self.loss_count = 0;
        self.last_good_slot = None;
    }

    fn bump(&mut self) {
        self.loss_count = self.loss_count.saturating_add(1);
        if self.state != DetectorState::Lost {
            self.state = DetectorState::Degraded;
        }
    }

    fn on_healthy(&mut self, current_slot: Option<SlotIndex>) -> Option<Transition> {
        let was_lost = self.state == DetectorState::Lost;
        self.loss_count = 0;
        self.state = DetectorState::Healthy;

        let current = current_slot?;
        let restored = match self.last_good_slot {
            Some(previous) if was_lost && previous != current => {
                Some(Transition::Restored { slot: current })
            }
            _ => None,
        };
        self.last_good_slot = Some(current);
        restored
    }
}
