//! Shared types for the dualsim failover engine.
//!
//! This crate contains:
//! - **Data models**: slot and link identifiers, quality verdicts, strategy
//!   kinds, status and network-info snapshots
//! - **Protocol messages**: events emitted to the host application and the
//!   JSON envelope they travel in
//! - **ID generation**: prefixed UUIDv7 helpers (`evt_`, `mon_`)

pub mod ids;
pub mod models;
pub mod protocol;
