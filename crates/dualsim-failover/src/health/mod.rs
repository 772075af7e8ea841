//! Link health: probing the active link and turning noisy verdicts into
//! stable lost/restored transitions.

pub mod detector;
pub mod probe;

pub use detector::{LossDetector, LossSignal, Transition};
pub use probe::{CheckResult, NetworkSample, ProbeReport, QualityProbe};
