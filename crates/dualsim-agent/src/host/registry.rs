//! Slot/link table from the agent config.

use std::collections::BTreeSet;
use std::sync::Arc;

use dualsim_common::models::{LinkId, SlotIndex};
use dualsim_failover::PlatformError;
use dualsim_failover::platform::SubscriptionRegistry;

use super::connectivity::SysfsConnectivity;
use crate::config::LinkConfig;

/// A configured slot is active when it has no interface or its interface
/// exists on the host.
pub struct ConfigRegistry {
    links: Vec<LinkConfig>,
    sysfs: Arc<SysfsConnectivity>,
}

impl ConfigRegistry {
    pub fn new(links: Vec<LinkConfig>, sysfs: Arc<SysfsConnectivity>) -> Self {
        Self { links, sysfs }
    }

    fn is_active(&self, link: &LinkConfig) -> bool {
        link.interface
            .as_deref()
            .is_none_or(|iface| self.sysfs.interface_exists(iface))
    }
}

impl SubscriptionRegistry for ConfigRegistry {
    fn resolve_link_id(&self, slot: SlotIndex) -> Result<LinkId, PlatformError> {
        self.links
            .iter()
            .find(|l| l.slot == slot && self.is_active(l))
            .map(|l| l.link_id)
            .ok_or_else(|| PlatformError::Unavailable(format!("no active link in slot {slot}")))
    }

    fn resolve_slot(&self, link_id: LinkId) -> Result<SlotIndex, PlatformError> {
        self.links
            .iter()
            .find(|l| l.link_id == link_id)
            .map(|l| l.slot)
            .ok_or_else(|| PlatformError::Unavailable(format!("link id {link_id} is not configured")))
    }

    fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError> {
        Ok(self
            .links
            .iter()
            .filter(|l| self.is_active(l))
            .map(|l| l.slot)
            .collect())
    }
}
