//! # Controller
//!
//! The public face of the engine. Wires the probe, detector, policy and
//! orchestrator to the injected [`Platform`] and runs them on a
//! [`FailoverRuntime`].
//!
//! Queries (`network_quality`, `network_info`, `status`) run on the
//! caller's thread. Anything that mutates monitor state goes through the
//! coordinator.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;
use tracing::{info, warn};

use dualsim_common::models::{MonitorStatus, NetworkInfo, Quality, SlotIndex};

use crate::config::{FailoverConfig, LEGACY_STATUS_KEYS};
use crate::error::FailoverError;
use crate::health::QualityProbe;
use crate::metrics::{FailoverMetrics, MetricsServer};
use crate::monitor::Monitor;
use crate::platform::Platform;
use crate::policy::FailoverPolicy;
use crate::runtime::{FailoverRuntime, PushHandle, RuntimeParts};
use crate::switcher::{SwitchContext, SwitchOrchestrator, SwitchSuccess};

pub struct Controller {
    platform: Platform,
    probe: Arc<QualityProbe>,
    orchestrator: Arc<SwitchOrchestrator>,
    runtime: FailoverRuntime,
    metrics: Arc<FailoverMetrics>,
    clock: Clock,
    push_registered: AtomicBool,
    metrics_server: Option<MetricsServer>,
}

impl Controller {
    pub fn new(config: FailoverConfig, platform: Platform) -> Self {
        Self::with_clock(config, platform, Clock::new())
    }

    /// Like [`Controller::new`] with an explicit clock; tests pass a mocked
    /// one to drive cooldowns.
    pub fn with_clock(config: FailoverConfig, platform: Platform, clock: Clock) -> Self {
        let metrics = Arc::new(FailoverMetrics::new());
        let probe = Arc::new(QualityProbe::new(
            config.probe.clone(),
            platform.connectivity.clone(),
            platform.reachability.clone(),
            clock.clone(),
        ));
        let ctx = SwitchContext {
            config: config.switch.clone(),
            registry: platform.registry.clone(),
            settings: platform.settings.clone(),
            executor: platform.executor.clone(),
            reflective: platform.reflective.clone(),
        };
        let orchestrator = Arc::new(SwitchOrchestrator::new(ctx, metrics.clone()));

        let runtime = FailoverRuntime::spawn(RuntimeParts {
            monitor: Monitor::new(&config.monitor, metrics.clone()),
            check_interval: config.monitor.check_interval,
            probe: probe.clone(),
            orchestrator: orchestrator.clone(),
            policy: FailoverPolicy::new(config.monitor.cooldown),
            events: platform.events.clone(),
            metrics: metrics.clone(),
            clock: clock.clone(),
        });

        Controller {
            platform,
            probe,
            orchestrator,
            runtime,
            metrics,
            clock,
            push_registered: AtomicBool::new(false),
            metrics_server: None,
        }
    }

    /// Start (or restart) monitoring with the given slot pair. Counters and
    /// the detector are reset; the first probe runs immediately.
    pub fn start_monitoring(&self, primary: u8, fallback: u8) -> Result<(), FailoverError> {
        let primary = SlotIndex::new(primary)?;
        let fallback = SlotIndex::new(fallback)?;
        if primary == fallback {
            return Err(FailoverError::InvalidPair(primary));
        }

        self.runtime.start(primary, fallback)?;

        if !self.push_registered.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.platform.push.register(self.runtime.push_handle()) {
                warn!(error = %e, "push registration failed, relying on polling");
                self.push_registered.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Stop monitoring. Idempotent. Results still in flight are discarded.
    pub fn stop_monitoring(&self) -> Result<(), FailoverError> {
        if self.push_registered.swap(false, Ordering::AcqRel) {
            self.platform.push.unregister();
        }
        self.runtime.stop()
    }

    /// One fused quality verdict for the active link.
    pub fn network_quality(&self) -> Quality {
        self.probe.sample()
    }

    pub fn network_info(&self) -> Result<NetworkInfo, FailoverError> {
        let report = self.probe.probe();
        let os = report.os.unwrap_or_default();
        let active_slots = self.platform.registry.list_active_slots()?;
        Ok(NetworkInfo {
            has_network: os.has_network,
            has_internet: os.has_internet,
            is_validated: os.validated,
            quality: report.quality,
            down_kbps: os.down_kbps,
            up_kbps: os.up_kbps,
            signal_level: os.signal_level,
            current_slot: self.orchestrator.current_slot().ok(),
            active_slots: active_slots.into_iter().collect(),
        })
    }

    /// Explicitly move mobile data to `slot`. Emits `SimSwitched` on a
    /// verified switch and starts the cooldown window.
    pub fn switch_to(&self, slot: u8) -> Result<SwitchSuccess, FailoverError> {
        let slot = SlotIndex::new(slot)?;
        if !self.orchestrator.can_switch() && self.orchestrator.current_slot().ok() != Some(slot) {
            return Err(FailoverError::PermissionDenied(
                "settings are read-only, elevated access is unavailable and the reflective API is unsupported"
                    .into(),
            ));
        }
        info!(slot = %slot, "explicit switch requested");
        self.runtime.switch(slot)
    }

    pub fn status(&self) -> Result<MonitorStatus, FailoverError> {
        let view = self.runtime.view()?;
        let registry = &self.platform.registry;

        let current_slot = self.orchestrator.current_slot().ok().or(view.current_slot);
        let current_link_id = current_slot.and_then(|s| registry.resolve_link_id(s).ok());
        let active_slots = registry
            .list_active_slots()
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        let legacy_keys = LEGACY_STATUS_KEYS
            .iter()
            .map(|key| {
                let value = self
                    .platform
                    .settings
                    .get_int(key, -1)
                    .ok()
                    .filter(|v| *v >= 0);
                (key.to_string(), value)
            })
            .collect();
        let now = self.clock.now();

        Ok(MonitorStatus {
            is_monitoring: view.state.is_monitoring,
            primary: view.state.primary,
            fallback: view.state.fallback,
            loss_count: view.loss_count,
            detector_state: view.detector_state,
            last_good_slot: view.last_good_slot,
            last_switch_ms_ago: view
                .state
                .last_switch_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            current_slot,
            current_link_id,
            active_slots,
            legacy_keys,
        })
    }

    /// Slot currently carrying mobile data.
    pub fn current_slot(&self) -> Result<SlotIndex, FailoverError> {
        Ok(self.orchestrator.current_slot()?)
    }

    /// Whether any switch strategy has the access it needs.
    pub fn can_switch(&self) -> bool {
        self.orchestrator.can_switch()
    }

    /// Whether elevated (superuser) access is available.
    pub fn is_elevated(&self) -> bool {
        self.platform.executor.is_elevated_available()
    }

    /// Probe now instead of waiting for the next tick.
    pub fn check_now(&self) {
        self.runtime.check_now();
    }

    /// Block until no probe or switch is in flight.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.runtime.wait_idle(timeout)
    }

    pub fn push_handle(&self) -> PushHandle {
        self.runtime.push_handle()
    }

    pub fn metrics(&self) -> Arc<FailoverMetrics> {
        self.metrics.clone()
    }

    /// Serve `GET /metrics` on `addr`. Replaces a previous server.
    pub fn start_metrics_server(&mut self, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        if let Some(mut old) = self.metrics_server.take() {
            old.stop();
        }
        let server = MetricsServer::start(addr, self.metrics.clone())?;
        let bound = server.addr();
        self.metrics_server = Some(server);
        Ok(bound)
    }

    /// Stop monitoring and the runtime threads. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut server) = self.metrics_server.take() {
            server.stop();
        }
        if self.push_registered.swap(false, Ordering::AcqRel) {
            self.platform.push.unregister();
        }
        self.runtime.shutdown();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
