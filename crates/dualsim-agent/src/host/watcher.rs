//! Push source that polls the default-route interface and reports edges.
//!
//! The host has no connectivity callbacks, so a small thread samples
//! [`SysfsConnectivity`] and calls the [`PushHandle`] when the network
//! appears or disappears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use dualsim_failover::platform::{ConnectivityMonitor, PushSource};
use dualsim_failover::{PlatformError, PushHandle};

use super::connectivity::SysfsConnectivity;

pub struct OperstateWatcher {
    sysfs: Arc<SysfsConnectivity>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl OperstateWatcher {
    pub fn new(sysfs: Arc<SysfsConnectivity>, interval: Duration) -> Self {
        Self {
            sysfs,
            interval,
            running: Mutex::new(None),
        }
    }
}

impl PushSource for OperstateWatcher {
    fn register(&self, handle: PushHandle) -> Result<(), PlatformError> {
        // Fails early on hosts without procfs.
        let initial = self.sysfs.snapshot()?.has_network;

        self.unregister();
        let stop = Arc::new(AtomicBool::new(false));
        let sysfs = self.sysfs.clone();
        let interval = self.interval;
        let thread_stop = stop.clone();
        let join = thread::Builder::new()
            .name("dualsim-watcher".into())
            .spawn(move || watch_loop(&sysfs, interval, initial, &thread_stop, &handle))
            .map_err(PlatformError::from)?;

        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *running = Some(Running { stop, handle: join });
        info!(interval_ms = interval.as_millis() as u64, "operstate watcher started");
        Ok(())
    }

    fn unregister(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            running.stop.store(true, Ordering::Relaxed);
            let _ = running.handle.join();
            debug!("operstate watcher stopped");
        }
    }
}

impl Drop for OperstateWatcher {
    fn drop(&mut self) {
        self.unregister();
    }
}

fn watch_loop(
    sysfs: &SysfsConnectivity,
    interval: Duration,
    mut last: bool,
    stop: &AtomicBool,
    handle: &PushHandle,
) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(interval);
        let now = sysfs.snapshot().map(|s| s.has_network).unwrap_or(false);
        match edge(last, now) {
            Some(true) => handle.network_available(),
            Some(false) => handle.network_lost(),
            None => {}
        }
        last = now;
    }
}

/// `Some(available)` when the state flipped.
fn edge(previous: bool, current: bool) -> Option<bool> {
    (previous != current).then_some(current)
}
