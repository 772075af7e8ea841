//! Error types.
//!
//! [`PlatformError`] is what collaborators report. [`AttemptFailure`] is the
//! reason a single strategy attempt did not produce a verified switch; those
//! are absorbed by the orchestrator. [`FailoverError`] is the caller-facing
//! taxonomy for whole-operation failures.

use std::time::Duration;

use thiserror::Error;

use dualsim_common::models::{InvalidSlot, SlotIndex, StrategyKind};

use crate::switcher::SwitchAttempt;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("{what} timed out after {timeout:?}")]
    Timeout { what: String, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => PlatformError::PermissionDenied(err.to_string()),
            _ => PlatformError::Io(err.to_string()),
        }
    }
}

/// Why one strategy attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("elevated access is not available")]
    NotElevated,
    #[error("strategy unsupported: {0}")]
    Unsupported(&'static str),
    #[error("no settings key accepted the write")]
    NoKeyAccepted,
    #[error("read-back of {key} returned {found}, expected {expected}")]
    ReadbackMismatch { key: String, expected: i64, found: i64 },
    #[error("verification expected slot {expected}, active slot is {found:?}")]
    VerificationMismatch {
        expected: SlotIndex,
        found: Option<SlotIndex>,
    },
    #[error("no service call code succeeded (tried {tried})")]
    ServiceCallFailed { tried: usize },
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl AttemptFailure {
    /// Skips are strategies that never touched the platform.
    pub fn is_skip(&self) -> bool {
        matches!(self, AttemptFailure::NotElevated | AttemptFailure::Unsupported(_))
    }
}

/// Whole-operation failures surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailoverError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("target slot {0} has no active link")]
    TargetInactive(SlotIndex),
    #[error("all switch strategies failed for slot {target}")]
    AllStrategiesFailed {
        target: SlotIndex,
        attempts: Vec<SwitchAttempt>,
    },
    #[error("{probe} probe timed out after {timeout:?}")]
    ProbeTimeout { probe: &'static str, timeout: Duration },
    #[error("{strategy} reported success but slot {expected} is not active")]
    VerificationMismatch {
        strategy: StrategyKind,
        expected: SlotIndex,
    },
    #[error(transparent)]
    InvalidSlot(#[from] InvalidSlot),
    #[error("primary and fallback must differ (both {0})")]
    InvalidPair(SlotIndex),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("controller has shut down")]
    Shutdown,
}

impl FailoverError {
    /// Stable machine-readable code, matching the host bridge's error codes.
    pub fn code(&self) -> &'static str {
        match self {
            FailoverError::PermissionDenied(_) => "PERMISSION_DENIED",
            FailoverError::TargetInactive(_) => "TARGET_INACTIVE",
            FailoverError::AllStrategiesFailed { .. } => "SWITCH_FAILED",
            FailoverError::ProbeTimeout { .. } => "PROBE_TIMEOUT",
            FailoverError::VerificationMismatch { .. } => "VERIFICATION_MISMATCH",
            FailoverError::InvalidSlot(_) | FailoverError::InvalidPair(_) => "INVALID_ARGUMENT",
            FailoverError::Platform(_) => "ERROR",
            FailoverError::Shutdown => "SHUTDOWN",
        }
    }
}
