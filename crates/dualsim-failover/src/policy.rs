//! # Failover Policy
//!
//! Pure decision: given where data is now, the configured pair, and when we
//! last switched, pick a target or explain why not.

use std::collections::BTreeSet;
use std::time::Duration;

use quanta::Instant;

use dualsim_common::models::SlotIndex;

/// Why the policy declined to switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyTarget,
    TargetInactive,
    Cooldown { remaining: Duration },
}

impl SkipReason {
    /// Label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyTarget => "already_target",
            SkipReason::TargetInactive => "target_inactive",
            SkipReason::Cooldown { .. } => "cooldown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Switch(SlotIndex),
    Skip(SkipReason),
}

/// Everything `decide` looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInput {
    /// Slot currently carrying data, if it could be read.
    pub current: Option<SlotIndex>,
    pub primary: SlotIndex,
    pub fallback: SlotIndex,
    pub active_slots: BTreeSet<SlotIndex>,
    pub last_switch_at: Option<Instant>,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    cooldown: Duration,
}

impl FailoverPolicy {
    pub fn new(cooldown: Duration) -> Self {
        FailoverPolicy { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// The slot we would move to from `current`.
    pub fn target_for(
        current: Option<SlotIndex>,
        primary: SlotIndex,
        fallback: SlotIndex,
    ) -> SlotIndex {
        if current == Some(primary) {
            fallback
        } else {
            primary
        }
    }

    pub fn decide(&self, input: &PolicyInput) -> Decision {
        let target = Self::target_for(input.current, input.primary, input.fallback);

        if input.current == Some(target) {
            return Decision::Skip(SkipReason::AlreadyTarget);
        }
        if !input.active_slots.contains(&target) {
            return Decision::Skip(SkipReason::TargetInactive);
        }
        if let Some(remaining) = self.cooldown_remaining(input.last_switch_at, input.now) {
            return Decision::Skip(SkipReason::Cooldown { remaining });
        }
        Decision::Switch(target)
    }

    /// Time left before another switch is allowed, `None` if allowed now.
    pub fn cooldown_remaining(&self, last_switch_at: Option<Instant>, now: Instant) -> Option<Duration> {
        let last = last_switch_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            None
        }
    }
}
