//! Automatic mobile-data failover between the two slots of a dual-SIM
//! device.
//!
//! - **Health**: [`health::QualityProbe`] fuses OS connectivity, signal
//!   level and active reachability checks into a [`Quality`] verdict;
//!   [`health::LossDetector`] turns verdicts and push events into stable
//!   lost/restored transitions
//! - **Policy**: [`policy::FailoverPolicy`] picks a target slot under a
//!   cooldown
//! - **Switching**: [`switcher::SwitchOrchestrator`] walks the activation
//!   strategies until one is verified
//! - **Runtime**: a single coordinator thread owns all monitor state; a
//!   worker thread runs the blocking I/O
//!
//! [`Controller`] is the entry point.
//!
//! [`Quality`]: dualsim_common::models::Quality

pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod platform;
pub mod policy;
pub mod runtime;
pub mod switcher;

pub use config::FailoverConfig;
pub use controller::Controller;
pub use error::{AttemptFailure, FailoverError, PlatformError};
pub use platform::Platform;
pub use runtime::PushHandle;
