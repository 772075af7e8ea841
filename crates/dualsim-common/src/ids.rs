//! Prefixed ID generation.
//!
//! IDs are a `prefix_` followed by a UUIDv7, so they sort by creation time
//! and identify their kind at a glance in logs.

use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Event envelope ID: `evt_<uuid7>`
pub fn event_id() -> String {
    prefixed_id("evt")
}

/// Monitoring session ID: `mon_<uuid7>`, one per `start_monitoring` call.
pub fn session_id() -> String {
    prefixed_id("mon")
}
