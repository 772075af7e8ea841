//! Host adapters: the platform interfaces backed by the real device.
//!
//! - `settings`: `settings get/put global` through the shell
//! - `executor`: `su -c` for service calls
//! - `connectivity`: default route, operstate and signal from sysfs/procfs
//! - `reachability`: `ping` and a blocking HTTP check
//! - `registry`: slot/link table from the config file
//! - `watcher`: operstate polling thread standing in for OS callbacks
//!
//! There is no private data-link API to call from here, so the reflective
//! strategy always reports itself unsupported.

mod connectivity;
mod executor;
mod reachability;
mod registry;
mod settings;
mod watcher;

use std::sync::Arc;

use anyhow::Context;

use dualsim_failover::Platform;
use dualsim_failover::platform::{EventSink, UnsupportedReflectiveApi};

use crate::config::AgentConfig;

use connectivity::SysfsConnectivity;
use executor::SuExecutor;
use reachability::SystemReachability;
use registry::ConfigRegistry;
use settings::ShellSettingsStore;
use watcher::OperstateWatcher;

pub fn platform(config: &AgentConfig, events: Arc<dyn EventSink>) -> anyhow::Result<Platform> {
    let sysfs = Arc::new(SysfsConnectivity::default());
    let reachability = SystemReachability::new().context("building reachability checker")?;

    Ok(Platform {
        registry: Arc::new(ConfigRegistry::new(config.links.clone(), sysfs.clone())),
        settings: Arc::new(ShellSettingsStore::new(&config.platform.settings_command)),
        executor: Arc::new(SuExecutor::new(&config.platform.elevation_command)),
        reflective: Arc::new(UnsupportedReflectiveApi),
        connectivity: sysfs.clone(),
        reachability: Arc::new(reachability),
        push: Arc::new(OperstateWatcher::new(sysfs, config.platform.watch_interval)),
        events,
    })
}
