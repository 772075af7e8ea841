//! In-memory dual-SIM device.
//!
//! One [`SimDevice`] implements every platform trait the engine consumes,
//! over a single shared state: the settings table, the subscription
//! registry, root access, the private data-link API and the per-slot link
//! conditions. What the connectivity monitor reports depends on which slot
//! the active settings key points at, so a verified switch changes what the
//! next probe sees.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use dualsim_common::models::{LinkId, Quality, SlotIndex};
use dualsim_failover::config::DEFAULT_ACTIVE_KEY;
use dualsim_failover::platform::{
    ConnectivityMonitor, ConnectivitySnapshot, EventSink, Platform, PrivilegedExecutor,
    PushSource, Reachability, ReflectiveApi, SettingsStore, SubscriptionRegistry,
};
use dualsim_failover::{PlatformError, PushHandle};

/// What one slot's link looks like to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCondition {
    pub snapshot: ConnectivitySnapshot,
    pub ping_ok: bool,
    pub http_ok: bool,
}

impl LinkCondition {
    pub fn with_signal(level: u8) -> Self {
        LinkCondition {
            snapshot: ConnectivitySnapshot::online(Some(level)),
            ping_ok: true,
            http_ok: true,
        }
    }

    pub fn excellent() -> Self {
        Self::with_signal(4)
    }

    pub fn good() -> Self {
        Self::with_signal(2)
    }

    /// Connected but the OS has not validated it.
    pub fn unvalidated() -> Self {
        LinkCondition {
            snapshot: ConnectivitySnapshot {
                validated: false,
                ..ConnectivitySnapshot::online(Some(2))
            },
            ping_ok: true,
            http_ok: true,
        }
    }

    /// No network at all.
    pub fn dead() -> Self {
        LinkCondition {
            snapshot: ConnectivitySnapshot::offline(),
            ping_ok: false,
            http_ok: false,
        }
    }

    /// The OS claims full connectivity but nothing gets through.
    pub fn black_hole() -> Self {
        LinkCondition {
            ping_ok: false,
            http_ok: false,
            ..Self::excellent()
        }
    }

    /// A condition the probe classifies as `quality` (active checks pass).
    pub fn for_quality(quality: Quality) -> Self {
        match quality {
            Quality::None => Self::dead(),
            Quality::Poor => Self::with_signal(1),
            Quality::Good => Self::good(),
            Quality::Excellent => Self::excellent(),
        }
    }
}

#[derive(Debug)]
struct SlotState {
    link_id: LinkId,
    active: bool,
    steady: LinkCondition,
    script: VecDeque<LinkCondition>,
    last_seen: LinkCondition,
}

#[derive(Debug)]
struct DeviceState {
    slots: [SlotState; 2],
    active_key: String,
    settings: HashMap<String, i64>,
    settings_writable: bool,
    /// Writes to these keys are acknowledged and silently dropped.
    frozen_keys: HashSet<String>,
    elevated: bool,
    accepted_codes: HashSet<u32>,
    /// Whether an accepted service call actually moves data.
    service_call_effective: bool,
    reflective_supported: bool,
    reflective_effective: bool,
    writes: Vec<(String, i64)>,
    commands: Vec<String>,
    reflective_calls: Vec<LinkId>,
    push: Option<PushHandle>,
    reachability_delay: Duration,
}

/// Shared handle to the simulated device.
#[derive(Debug)]
pub struct SimDevice {
    state: Mutex<DeviceState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// Both slots active with excellent links, data on slot 0, settings
    /// writable, no root, no reflective API. Link ids are 1 and 2.
    pub fn new() -> Self {
        let slot = |id| SlotState {
            link_id: LinkId(id),
            active: true,
            steady: LinkCondition::excellent(),
            script: VecDeque::new(),
            last_seen: LinkCondition::excellent(),
        };
        let mut settings = HashMap::new();
        settings.insert(DEFAULT_ACTIVE_KEY.to_string(), 1);
        SimDevice {
            state: Mutex::new(DeviceState {
                slots: [slot(1), slot(2)],
                active_key: DEFAULT_ACTIVE_KEY.to_string(),
                settings,
                settings_writable: true,
                frozen_keys: HashSet::new(),
                elevated: false,
                accepted_codes: HashSet::new(),
                service_call_effective: true,
                reflective_supported: false,
                reflective_effective: true,
                writes: Vec::new(),
                commands: Vec::new(),
                reflective_calls: Vec::new(),
                push: None,
                reachability_delay: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every collaborator backed by this device.
    pub fn platform(self: &Arc<Self>, events: Arc<dyn EventSink>) -> Platform {
        Platform {
            registry: self.clone(),
            settings: self.clone(),
            executor: self.clone(),
            reflective: self.clone(),
            connectivity: self.clone(),
            reachability: self.clone(),
            push: self.clone(),
            events,
        }
    }

    // ── Setup ───────────────────────────────────────────────────

    pub fn set_data_slot(&self, slot: SlotIndex) {
        let mut st = self.lock();
        let id = st.slots[slot.get() as usize].link_id.0;
        let key = st.active_key.clone();
        st.settings.insert(key, id);
    }

    pub fn set_active(&self, slot: SlotIndex, active: bool) {
        self.lock().slots[slot.get() as usize].active = active;
    }

    /// Steady-state condition of `slot` once its script runs out.
    pub fn set_condition(&self, slot: SlotIndex, condition: LinkCondition) {
        let mut st = self.lock();
        let s = &mut st.slots[slot.get() as usize];
        s.steady = condition;
        s.last_seen = condition;
    }

    /// Conditions returned by successive probes of `slot`, one per probe.
    pub fn script(&self, slot: SlotIndex, conditions: impl IntoIterator<Item = LinkCondition>) {
        self.lock().slots[slot.get() as usize]
            .script
            .extend(conditions);
    }

    pub fn script_qualities(&self, slot: SlotIndex, qualities: &[Quality]) {
        self.script(slot, qualities.iter().map(|&q| LinkCondition::for_quality(q)));
    }

    pub fn set_settings_writable(&self, writable: bool) {
        self.lock().settings_writable = writable;
    }

    pub fn freeze_key(&self, key: &str) {
        self.lock().frozen_keys.insert(key.to_string());
    }

    /// Freeze every key, so settings writes never take effect.
    pub fn freeze_all_keys(&self, keys: &[String]) {
        let mut st = self.lock();
        st.frozen_keys.extend(keys.iter().cloned());
    }

    pub fn set_elevated(&self, elevated: bool) {
        self.lock().elevated = elevated;
    }

    /// Service-call codes that exit 0. `effective` controls whether they
    /// actually move data.
    pub fn accept_service_codes(&self, codes: &[u32], effective: bool) {
        let mut st = self.lock();
        st.accepted_codes = codes.iter().copied().collect();
        st.service_call_effective = effective;
    }

    pub fn set_reflective(&self, supported: bool, effective: bool) {
        let mut st = self.lock();
        st.reflective_supported = supported;
        st.reflective_effective = effective;
    }

    /// Make ping and HTTP checks block this long.
    pub fn set_reachability_delay(&self, delay: Duration) {
        self.lock().reachability_delay = delay;
    }

    pub fn set_raw_setting(&self, key: &str, value: i64) {
        self.lock().settings.insert(key.to_string(), value);
    }

    // ── Inspection ──────────────────────────────────────────────

    /// Slot the active key points at.
    pub fn data_slot(&self) -> Option<SlotIndex> {
        let st = self.lock();
        let id = *st.settings.get(&st.active_key)?;
        slot_for(&st, LinkId(id))
    }

    pub fn writes(&self) -> Vec<(String, i64)> {
        self.lock().writes.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn reflective_calls(&self) -> Vec<LinkId> {
        self.lock().reflective_calls.clone()
    }

    pub fn push_registered(&self) -> bool {
        self.lock().push.is_some()
    }

    // ── OS callbacks ────────────────────────────────────────────

    pub fn push_lost(&self) {
        if let Some(handle) = self.lock().push.clone() {
            handle.network_lost();
        }
    }

    pub fn push_available(&self) {
        if let Some(handle) = self.lock().push.clone() {
            handle.network_available();
        }
    }

    fn current_condition(&self) -> LinkCondition {
        let st = self.lock();
        let slot = st
            .settings
            .get(&st.active_key)
            .and_then(|&id| slot_for(&st, LinkId(id)));
        match slot {
            Some(slot) => st.slots[slot.get() as usize].last_seen,
            None => LinkCondition::dead(),
        }
    }

    fn move_data_to(st: &mut DeviceState, slot: SlotIndex) {
        let id = st.slots[slot.get() as usize].link_id.0;
        let key = st.active_key.clone();
        st.settings.insert(key, id);
    }
}

fn slot_for(st: &DeviceState, link_id: LinkId) -> Option<SlotIndex> {
    st.slots
        .iter()
        .position(|s| s.link_id == link_id)
        .and_then(|idx| SlotIndex::new(idx as u8).ok())
}

impl SubscriptionRegistry for SimDevice {
    fn resolve_link_id(&self, slot: SlotIndex) -> Result<LinkId, PlatformError> {
        let st = self.lock();
        let s = &st.slots[slot.get() as usize];
        if s.active {
            Ok(s.link_id)
        } else {
            Err(PlatformError::Unavailable(format!("no subscription in slot {slot}")))
        }
    }

    fn resolve_slot(&self, link_id: LinkId) -> Result<SlotIndex, PlatformError> {
        slot_for(&self.lock(), link_id)
            .ok_or_else(|| PlatformError::Unavailable(format!("unknown link id {link_id}")))
    }

    fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError> {
        let st = self.lock();
        Ok(SlotIndex::ALL
            .into_iter()
            .filter(|slot| st.slots[slot.get() as usize].active)
            .collect())
    }
}

impl SettingsStore for SimDevice {
    fn get_int(&self, key: &str, default: i64) -> Result<i64, PlatformError> {
        Ok(self.lock().settings.get(key).copied().unwrap_or(default))
    }

    fn put_int(&self, key: &str, value: i64) -> Result<bool, PlatformError> {
        let mut st = self.lock();
        if !st.settings_writable {
            return Err(PlatformError::PermissionDenied("WRITE_SECURE_SETTINGS".into()));
        }
        st.writes.push((key.to_string(), value));
        if !st.frozen_keys.contains(key) {
            st.settings.insert(key.to_string(), value);
        }
        Ok(true)
    }

    fn can_write(&self) -> bool {
        self.lock().settings_writable
    }
}

impl PrivilegedExecutor for SimDevice {
    fn run_elevated(&self, command: &str) -> Result<i32, PlatformError> {
        let mut st = self.lock();
        if !st.elevated {
            return Err(PlatformError::PermissionDenied("su not available".into()));
        }
        st.commands.push(command.to_string());

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["exit"] => Ok(0),
            ["service", "call", "phone", code, "i32", slot, ..] => {
                let (Ok(code), Ok(slot)) = (code.parse::<u32>(), slot.parse::<u8>()) else {
                    return Ok(2);
                };
                if !st.accepted_codes.contains(&code) {
                    return Ok(1);
                }
                if st.service_call_effective {
                    if let Ok(slot) = SlotIndex::new(slot) {
                        SimDevice::move_data_to(&mut st, slot);
                    }
                }
                Ok(0)
            }
            _ => Ok(127),
        }
    }

    fn is_elevated_available(&self) -> bool {
        self.lock().elevated
    }
}

impl ReflectiveApi for SimDevice {
    fn set_default_data_link(&self, link_id: LinkId) -> Result<(), PlatformError> {
        let mut st = self.lock();
        if !st.reflective_supported {
            return Err(PlatformError::Unsupported("reflective data-link API"));
        }
        st.reflective_calls.push(link_id);
        if st.reflective_effective {
            if let Some(slot) = slot_for(&st, link_id) {
                SimDevice::move_data_to(&mut st, slot);
            }
        }
        Ok(())
    }

    fn is_supported(&self) -> bool {
        self.lock().reflective_supported
    }
}

impl ConnectivityMonitor for SimDevice {
    fn snapshot(&self) -> Result<ConnectivitySnapshot, PlatformError> {
        let mut st = self.lock();
        let Some(slot) = st
            .settings
            .get(&st.active_key)
            .and_then(|&id| slot_for(&st, LinkId(id)))
        else {
            return Ok(ConnectivitySnapshot::offline());
        };
        let s = &mut st.slots[slot.get() as usize];
        let condition = s.script.pop_front().unwrap_or(s.steady);
        s.last_seen = condition;
        debug!(slot = %slot, ?condition, "simulated snapshot");
        Ok(condition.snapshot)
    }
}

impl Reachability for SimDevice {
    fn ping(&self, _host: &str, _timeout: Duration) -> Result<bool, PlatformError> {
        let delay = self.lock().reachability_delay;
        std::thread::sleep(delay);
        Ok(self.current_condition().ping_ok)
    }

    fn http_check(&self, _url: &str, _timeout: Duration) -> Result<bool, PlatformError> {
        let delay = self.lock().reachability_delay;
        std::thread::sleep(delay);
        Ok(self.current_condition().http_ok)
    }
}

impl PushSource for SimDevice {
    fn register(&self, handle: PushHandle) -> Result<(), PlatformError> {
        self.lock().push = Some(handle);
        Ok(())
    }

    fn unregister(&self) {
        self.lock().push = None;
    }
}
