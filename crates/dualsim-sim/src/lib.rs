//! Simulated dual-SIM device for integration testing and demos.
//!
//! Provides an in-memory device implementing every platform interface the
//! failover engine consumes, a recording event sink, and deterministic
//! link-quality scenario generation for exercising failover under
//! controlled conditions.

pub mod device;
pub mod scenario;
pub mod sink;

pub use device::{LinkCondition, SimDevice};
pub use scenario::{Scenario, ScenarioConfig, ScenarioFrame, SlotScenarioConfig};
pub use sink::RecordingSink;
