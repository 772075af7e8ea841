//! Collaborator interfaces the engine depends on.
//!
//! Every OS-facing concern is a trait object injected through [`Platform`],
//! so the controller runs unchanged against real host adapters, the
//! simulated device in `dualsim-sim`, or hand-written mocks in tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dualsim_common::models::{LinkId, SlotIndex};
use dualsim_common::protocol::FailoverEvent;

use crate::error::PlatformError;
use crate::runtime::PushHandle;

/// Resolves slot indices to the link identifiers the settings store uses.
pub trait SubscriptionRegistry: Send + Sync {
    fn resolve_link_id(&self, slot: SlotIndex) -> Result<LinkId, PlatformError>;
    fn resolve_slot(&self, link_id: LinkId) -> Result<SlotIndex, PlatformError>;
    /// Slots that currently hold an active subscription, ascending.
    fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError>;
}

/// Integer key-value backing store (global settings table).
pub trait SettingsStore: Send + Sync {
    fn get_int(&self, key: &str, default: i64) -> Result<i64, PlatformError>;
    /// Returns whether the store acknowledged the write. An acknowledged
    /// write is not yet verified.
    fn put_int(&self, key: &str, value: i64) -> Result<bool, PlatformError>;
    /// Whether this process may write to the store at all.
    fn can_write(&self) -> bool {
        true
    }
}

/// Runs commands with superuser rights.
pub trait PrivilegedExecutor: Send + Sync {
    /// Runs `command` elevated and returns its exit status.
    fn run_elevated(&self, command: &str) -> Result<i32, PlatformError>;
    fn is_elevated_available(&self) -> bool;
}

/// Private platform call that sets the default data link directly.
///
/// Implementations that cannot reach such an API return
/// [`PlatformError::Unsupported`].
pub trait ReflectiveApi: Send + Sync {
    fn set_default_data_link(&self, link_id: LinkId) -> Result<(), PlatformError>;
    fn is_supported(&self) -> bool;
}

/// OS view of the active network, as reported by the connectivity service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
    /// An active network handle exists.
    pub has_network: bool,
    pub has_internet: bool,
    /// The OS confirmed real end-to-end connectivity.
    pub validated: bool,
    /// Link-level signal ordinal 0–4.
    pub signal_level: Option<u8>,
    pub down_kbps: Option<u32>,
    pub up_kbps: Option<u32>,
}

impl ConnectivitySnapshot {
    /// A validated network with the given signal ordinal.
    pub fn online(signal_level: Option<u8>) -> Self {
        Self {
            has_network: true,
            has_internet: true,
            validated: true,
            signal_level,
            down_kbps: None,
            up_kbps: None,
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}

/// OS capability queries.
pub trait ConnectivityMonitor: Send + Sync {
    fn snapshot(&self) -> Result<ConnectivitySnapshot, PlatformError>;
}

/// Active reachability checks. Both calls must return within `timeout`.
pub trait Reachability: Send + Sync {
    /// Host reachability (ICMP-style echo).
    fn ping(&self, host: &str, timeout: Duration) -> Result<bool, PlatformError>;
    /// HTTP GET, `true` on a 200 or 204 response.
    fn http_check(&self, url: &str, timeout: Duration) -> Result<bool, PlatformError>;
}

/// Source of asynchronous OS network callbacks.
///
/// `register` hands the source a [`PushHandle`]; the source calls it from
/// its own thread whenever the OS reports a network as available or lost.
pub trait PushSource: Send + Sync {
    fn register(&self, handle: PushHandle) -> Result<(), PlatformError>;
    fn unregister(&self);
}

/// Receives events for the host application.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FailoverEvent);
}

/// Push source for platforms without network callbacks. Monitoring then
/// relies on periodic probing alone.
#[derive(Debug, Default)]
pub struct NoPushSource;

impl PushSource for NoPushSource {
    fn register(&self, _handle: PushHandle) -> Result<(), PlatformError> {
        Ok(())
    }

    fn unregister(&self) {}
}

/// Reflective API for hosts that have none.
#[derive(Debug, Default)]
pub struct UnsupportedReflectiveApi;

impl ReflectiveApi for UnsupportedReflectiveApi {
    fn set_default_data_link(&self, _link_id: LinkId) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("reflective data-link API"))
    }

    fn is_supported(&self) -> bool {
        false
    }
}

/// Event sink that only logs.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: FailoverEvent) {
        tracing::info!(event = event.name(), ?event, "failover event");
    }
}

/// Event sink forwarding into a crossbeam channel.
impl EventSink for crossbeam_channel::Sender<FailoverEvent> {
    fn emit(&self, event: FailoverEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// The full set of injected collaborators.
#[derive(Clone)]
pub struct Platform {
    pub registry: Arc<dyn SubscriptionRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub executor: Arc<dyn PrivilegedExecutor>,
    pub reflective: Arc<dyn ReflectiveApi>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub reachability: Arc<dyn Reachability>,
    pub push: Arc<dyn PushSource>,
    pub events: Arc<dyn EventSink>,
}

/// Reads which slot currently carries mobile data: the link id stored under
/// `active_key`, mapped back through the registry.
///
/// This is the single read-back used to verify every switch strategy.
pub fn current_data_slot(
    settings: &dyn SettingsStore,
    registry: &dyn SubscriptionRegistry,
    active_key: &str,
) -> Result<SlotIndex, PlatformError> {
    let raw = settings.get_int(active_key, -1)?;
    if raw < 0 {
        return Err(PlatformError::Unavailable(format!("{active_key} is not set")));
    }
    registry.resolve_slot(LinkId(raw))
}
