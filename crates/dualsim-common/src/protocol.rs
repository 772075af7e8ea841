//! Events emitted to the host application and their JSON envelope.
//!
//! Event names and field names follow the host bridge's camelCase
//! convention (`simSwitched`, `autoSwitched`, `networkRestored`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;
use crate::models::{SlotIndex, SwitchReason};

// ── Events ──────────────────────────────────────────────────────────

/// All events the engine can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FailoverEvent {
    /// An explicit `switch_to` call activated `slot`.
    #[serde(rename_all = "camelCase")]
    SimSwitched { slot: SlotIndex, ts: DateTime<Utc> },

    /// The monitor moved data from `from` to `to` on its own.
    #[serde(rename_all = "camelCase")]
    AutoSwitched {
        from: SlotIndex,
        to: SlotIndex,
        reason: SwitchReason,
        ts: DateTime<Utc>,
    },

    /// A healthy network came back on `slot` after a loss.
    #[serde(rename_all = "camelCase")]
    NetworkRestored { slot: SlotIndex, ts: DateTime<Utc> },
}

impl FailoverEvent {
    pub fn sim_switched(slot: SlotIndex) -> Self {
        FailoverEvent::SimSwitched { slot, ts: Utc::now() }
    }

    pub fn auto_switched(from: SlotIndex, to: SlotIndex) -> Self {
        FailoverEvent::AutoSwitched {
            from,
            to,
            reason: SwitchReason::NetworkLost,
            ts: Utc::now(),
        }
    }

    pub fn network_restored(slot: SlotIndex) -> Self {
        FailoverEvent::NetworkRestored { slot, ts: Utc::now() }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            FailoverEvent::SimSwitched { .. } => "simSwitched",
            FailoverEvent::AutoSwitched { .. } => "autoSwitched",
            FailoverEvent::NetworkRestored { .. } => "networkRestored",
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            FailoverEvent::SimSwitched { ts, .. }
            | FailoverEvent::AutoSwitched { ts, .. }
            | FailoverEvent::NetworkRestored { ts, .. } => *ts,
        }
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// Outer envelope for events written to an external channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID (`evt_` + UUIDv7, time-ordered).
    pub id: String,
    /// Event name, e.g. `"autoSwitched"`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// ISO 8601 timestamp of the event itself.
    pub ts: DateTime<Utc>,
    /// The serialized event.
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn for_event(event: &FailoverEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: ids::event_id(),
            msg_type: event.name().to_string(),
            ts: event.ts(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// Parse the payload back into an event.
    pub fn parse_event(&self) -> Result<FailoverEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_switched_wire_shape() {
        let ev = FailoverEvent::auto_switched(SlotIndex::FIRST, SlotIndex::SECOND);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "autoSwitched");
        assert_eq!(v["from"], 0);
        assert_eq!(v["to"], 1);
        assert_eq!(v["reason"], "networkLost");
        assert!(v["ts"].is_string());
    }

    #[test]
    fn envelope_carries_event_name() {
        let ev = FailoverEvent::network_restored(SlotIndex::SECOND);
        let env = Envelope::for_event(&ev).unwrap();
        assert!(env.id.starts_with("evt_"));
        assert_eq!(env.msg_type, "networkRestored");
        assert_eq!(env.ts, ev.ts());
        assert_eq!(env.parse_event().unwrap(), ev);
    }

    #[test]
    fn sim_switched_roundtrips_through_json() {
        let ev = FailoverEvent::sim_switched(SlotIndex::FIRST);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"simSwitched\""));
        let back: FailoverEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
