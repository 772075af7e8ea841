//! Data models shared by the engine, the simulator and the agent.
//!
//! Everything here is plain data: identifiers, verdicts and the snapshots
//! returned by the query operations. None of it performs I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Slots & Links ───────────────────────────────────────────────────

/// Number of SIM slots the engine arbitrates between.
pub const SLOT_COUNT: u8 = 2;

/// Index of a SIM slot. Only `0` and `1` are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotIndex(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("slot index must be 0 or 1, got {0}")]
pub struct InvalidSlot(pub u8);

impl SlotIndex {
    pub const FIRST: SlotIndex = SlotIndex(0);
    pub const SECOND: SlotIndex = SlotIndex(1);

    /// Both slots in ascending order.
    pub const ALL: [SlotIndex; 2] = [SlotIndex::FIRST, SlotIndex::SECOND];

    pub fn new(index: u8) -> Result<Self, InvalidSlot> {
        if index < SLOT_COUNT {
            Ok(SlotIndex(index))
        } else {
            Err(InvalidSlot(index))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The other slot of the pair.
    pub fn other(self) -> SlotIndex {
        SlotIndex(1 - self.0)
    }

    /// Human-facing SIM number (1-based), used in log lines.
    pub fn sim_number(self) -> u8 {
        self.0 + 1
    }
}

impl TryFrom<u8> for SlotIndex {
    type Error = InvalidSlot;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SlotIndex::new(value)
    }
}

impl From<SlotIndex> for u8 {
    fn from(slot: SlotIndex) -> u8 {
        slot.0
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier the settings store uses for a link (the subscription
/// id on Android). Distinct from the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub i64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Quality ─────────────────────────────────────────────────────────

/// Link health verdict. Variant order is the total order
/// `None < Poor < Good < Excellent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    None,
    Poor,
    Good,
    Excellent,
}

impl Quality {
    /// Good or better. These samples reset the loss counter.
    pub fn is_healthy(self) -> bool {
        self >= Quality::Good
    }

    /// Map a signal-strength ordinal (0–4) to a verdict.
    ///
    /// Ordinal 0 maps to `None`; out-of-range values fall back to `Good`.
    pub fn from_signal_level(level: u8) -> Quality {
        match level {
            0 => Quality::None,
            1 => Quality::Poor,
            2 => Quality::Good,
            3 | 4 => Quality::Excellent,
            _ => Quality::Good,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::None => "NONE",
            Quality::Poor => "POOR",
            Quality::Good => "GOOD",
            Quality::Excellent => "EXCELLENT",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Switching ───────────────────────────────────────────────────────

/// Link-activation strategies, declared in priority order (least invasive
/// first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SettingsWrite,
    PrivilegedServiceCall,
    ReflectiveApiCall,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::SettingsWrite,
        StrategyKind::PrivilegedServiceCall,
        StrategyKind::ReflectiveApiCall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::SettingsWrite => "settings_write",
            StrategyKind::PrivilegedServiceCall => "privileged_service_call",
            StrategyKind::ReflectiveApiCall => "reflective_api_call",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an automatic switch happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchReason {
    NetworkLost,
}

// ── Detector ────────────────────────────────────────────────────────

/// Hysteresis state of the loss detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Lost,
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorState::Unknown => write!(f, "unknown"),
            DetectorState::Healthy => write!(f, "healthy"),
            DetectorState::Degraded => write!(f, "degraded"),
            DetectorState::Lost => write!(f, "lost"),
        }
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

/// Point-in-time view of the active network, returned by `network_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub has_network: bool,
    pub has_internet: bool,
    pub is_validated: bool,
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_kbps: Option<u32>,
    /// Signal ordinal 0–4, absent when the platform cannot read it.
    pub signal_level: Option<u8>,
    pub current_slot: Option<SlotIndex>,
    pub active_slots: Vec<SlotIndex>,
}

/// Snapshot of the monitor state plus the current link, returned by
/// `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub is_monitoring: bool,
    pub primary: Option<SlotIndex>,
    pub fallback: Option<SlotIndex>,
    pub loss_count: u32,
    pub detector_state: DetectorState,
    pub last_good_slot: Option<SlotIndex>,
    /// Milliseconds since the last successful switch, if any.
    pub last_switch_ms_ago: Option<u64>,
    pub current_slot: Option<SlotIndex>,
    pub current_link_id: Option<LinkId>,
    pub active_slots: Vec<SlotIndex>,
    /// Raw values of the legacy per-slot data keys, `None` when unset.
    pub legacy_keys: Vec<(String, Option<i64>)>,
}
