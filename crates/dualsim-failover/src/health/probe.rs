//! # Quality Probe
//!
//! Fuses the OS connectivity verdict, the link signal ordinal and two active
//! reachability checks into one [`Quality`].
//!
//! The OS verdict is cheap and comes first. The active checks exist because
//! the OS "validated" flag can lag real conditions: when both the ping and
//! the HTTP check fail, the verdict is forced to `None` regardless of what
//! the OS claims.
//!
//! Each active check runs on its own short-lived thread and is abandoned
//! once its deadline passes; a hung adapter cannot stall the caller beyond
//! `timeout` plus a small grace period.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use quanta::{Clock, Instant};
use tracing::{debug, warn};

use dualsim_common::models::Quality;

use crate::config::ProbeConfig;
use crate::error::{FailoverError, PlatformError};
use crate::platform::{ConnectivityMonitor, ConnectivitySnapshot, Reachability};

/// Slack on top of the sub-probe timeout before a check is abandoned.
const CHECK_GRACE: Duration = Duration::from_millis(250);

/// Outcome of one active reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Passed,
    Failed,
    TimedOut,
    /// Not run: active probes are disabled or the OS verdict was already
    /// `None`.
    Skipped,
}

impl CheckResult {
    /// Failed or timed out. Skipped checks are not failures.
    pub fn is_negative(self) -> bool {
        matches!(self, CheckResult::Failed | CheckResult::TimedOut)
    }
}

/// A quality verdict and when it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSample {
    pub quality: Quality,
    pub observed_at: Instant,
}

/// Everything one probe pass learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// `None` when the connectivity service itself failed.
    pub os: Option<ConnectivitySnapshot>,
    /// Verdict from OS state and signal alone (steps 1–4).
    pub os_quality: Quality,
    /// Fused verdict.
    pub quality: Quality,
    pub ping: CheckResult,
    pub http: CheckResult,
    pub observed_at: Instant,
}

impl ProbeReport {
    pub fn sample(&self) -> NetworkSample {
        NetworkSample {
            quality: self.quality,
            observed_at: self.observed_at,
        }
    }

    /// The host reachability check ran and did not pass.
    pub fn reachability_failed(&self) -> bool {
        self.ping.is_negative()
    }
}

/// Map OS connectivity state to a verdict.
pub fn classify(snapshot: &ConnectivitySnapshot) -> Quality {
    if !snapshot.has_network || !snapshot.has_internet {
        return Quality::None;
    }
    if !snapshot.validated {
        return Quality::Poor;
    }
    match snapshot.signal_level {
        Some(level) => Quality::from_signal_level(level),
        None => Quality::Good,
    }
}

/// Combine the OS verdict with the active checks.
pub fn fuse(os_quality: Quality, ping: CheckResult, http: CheckResult) -> Quality {
    if ping.is_negative() && http.is_negative() {
        Quality::None
    } else {
        os_quality
    }
}

/// Samples the health of the active link.
pub struct QualityProbe {
    config: ProbeConfig,
    connectivity: Arc<dyn ConnectivityMonitor>,
    reachability: Arc<dyn Reachability>,
    clock: Clock,
}

impl QualityProbe {
    pub fn new(
        config: ProbeConfig,
        connectivity: Arc<dyn ConnectivityMonitor>,
        reachability: Arc<dyn Reachability>,
        clock: Clock,
    ) -> Self {
        Self {
            config,
            connectivity,
            reachability,
            clock,
        }
    }

    /// Current OS connectivity state and the verdict derived from it.
    pub fn os_verdict(&self) -> (Option<ConnectivitySnapshot>, Quality) {
        match self.connectivity.snapshot() {
            Ok(snapshot) => (Some(snapshot), classify(&snapshot)),
            Err(e) => {
                warn!(error = %e, "connectivity query failed");
                (None, Quality::None)
            }
        }
    }

    /// Full probe pass. Blocks for at most one sub-probe timeout (plus
    /// grace): the two active checks run concurrently.
    pub fn probe(&self) -> ProbeReport {
        let (os, os_quality) = self.os_verdict();

        let (ping, http) = if self.config.active_probes && os_quality > Quality::None {
            self.run_active_checks()
        } else {
            (CheckResult::Skipped, CheckResult::Skipped)
        };

        let quality = fuse(os_quality, ping, http);
        if quality < os_quality {
            warn!(
                os_quality = %os_quality,
                "ping and HTTP checks failed, no real internet"
            );
        }
        debug!(
            os_quality = %os_quality,
            quality = %quality,
            ?ping,
            ?http,
            "probe complete"
        );

        ProbeReport {
            os,
            os_quality,
            quality,
            ping,
            http,
            observed_at: self.clock.now(),
        }
    }

    /// `sample()` from the component contract: the fused verdict.
    pub fn sample(&self) -> Quality {
        self.probe().quality
    }

    fn run_active_checks(&self) -> (CheckResult, CheckResult) {
        let timeout = self.config.timeout;
        let deadline = std::time::Instant::now() + timeout + CHECK_GRACE;

        let reachability = self.reachability.clone();
        let host = self.config.ping_host.clone();
        let ping_rx = spawn_check("ping", move || reachability.ping(&host, timeout));

        let reachability = self.reachability.clone();
        let url = self.config.http_url.clone();
        let http_rx = spawn_check("http", move || reachability.http_check(&url, timeout));

        let ping = await_check("ping", ping_rx, deadline, timeout);
        let http = await_check("http", http_rx, deadline, timeout);
        (ping, http)
    }
}

type CheckOutcome = Result<bool, PlatformError>;

fn spawn_check<F>(name: &'static str, check: F) -> Option<Receiver<CheckOutcome>>
where
    F: FnOnce() -> CheckOutcome + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("dualsim-{name}"))
        .spawn(move || {
            // The receiver may be gone if the check overran its deadline.
            let _ = tx.send(check());
        });
    match spawned {
        Ok(_) => Some(rx),
        Err(e) => {
            warn!(check = name, error = %e, "failed to spawn check thread");
            None
        }
    }
}

fn await_check(
    name: &'static str,
    rx: Option<Receiver<CheckOutcome>>,
    deadline: std::time::Instant,
    timeout: Duration,
) -> CheckResult {
    let Some(rx) = rx else {
        return CheckResult::Failed;
    };
    match rx.recv_deadline(deadline) {
        Ok(Ok(true)) => CheckResult::Passed,
        Ok(Ok(false)) => CheckResult::Failed,
        Ok(Err(PlatformError::Timeout { .. })) | Err(RecvTimeoutError::Timeout) => {
            let err = FailoverError::ProbeTimeout {
                probe: name,
                timeout,
            };
            warn!(error = %err, "treating as negative sample");
            CheckResult::TimedOut
        }
        Ok(Err(e)) => {
            debug!(check = name, error = %e, "check failed");
            CheckResult::Failed
        }
        Err(RecvTimeoutError::Disconnected) => CheckResult::Failed,
    }
}
