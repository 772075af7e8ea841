//! Connectivity state read from sysfs and procfs.
//!
//! The active network is whichever interface holds the default route. It
//! counts as validated when the interface is up with carrier; the signal
//! ordinal comes from `/proc/net/wireless` when the interface is listed
//! there.

use std::fs;
use std::path::{Path, PathBuf};

use dualsim_failover::PlatformError;
use dualsim_failover::platform::{ConnectivityMonitor, ConnectivitySnapshot};

/// Best `/proc/net/wireless` link quality.
const MAX_LINK_QUALITY: f64 = 70.0;

#[derive(Debug, Clone)]
pub struct SysfsConnectivity {
    sys_net: PathBuf,
    proc_net: PathBuf,
}

impl Default for SysfsConnectivity {
    fn default() -> Self {
        Self::with_roots("/sys/class/net", "/proc/net")
    }
}

impl SysfsConnectivity {
    pub fn with_roots(sys_net: impl Into<PathBuf>, proc_net: impl Into<PathBuf>) -> Self {
        Self {
            sys_net: sys_net.into(),
            proc_net: proc_net.into(),
        }
    }

    /// Interface currently holding the default route.
    pub fn default_interface(&self) -> Option<String> {
        let route = fs::read_to_string(self.proc_net.join("route")).ok()?;
        default_route_interface(&route)
    }

    pub fn interface_exists(&self, iface: &str) -> bool {
        self.sys_net.join(iface).exists()
    }

    pub fn is_up(&self, iface: &str) -> bool {
        read_trimmed(&self.sys_net.join(iface).join("operstate"))
            .is_some_and(|state| operstate_is_up(&state))
    }

    fn has_carrier(&self, iface: &str) -> bool {
        read_trimmed(&self.sys_net.join(iface).join("carrier")).as_deref() == Some("1")
    }

    fn speed_kbps(&self, iface: &str) -> Option<u32> {
        let mbps: i64 = read_trimmed(&self.sys_net.join(iface).join("speed"))?
            .parse()
            .ok()?;
        (mbps > 0).then(|| (mbps as u32).saturating_mul(1000))
    }

    fn signal_level(&self, iface: &str) -> Option<u8> {
        let wireless = fs::read_to_string(self.proc_net.join("wireless")).ok()?;
        wireless_link_quality(&wireless, iface).map(signal_ordinal)
    }
}

impl ConnectivityMonitor for SysfsConnectivity {
    fn snapshot(&self) -> Result<ConnectivitySnapshot, PlatformError> {
        if !self.proc_net.join("route").exists() {
            return Err(PlatformError::Unsupported("procfs route table"));
        }
        let Some(iface) = self.default_interface() else {
            return Ok(ConnectivitySnapshot::offline());
        };
        let up = self.is_up(&iface);
        let speed = self.speed_kbps(&iface);
        Ok(ConnectivitySnapshot {
            has_network: up,
            has_internet: up,
            validated: up && self.has_carrier(&iface),
            signal_level: self.signal_level(&iface),
            down_kbps: speed,
            up_kbps: speed,
        })
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Cellular drivers often report `unknown` while passing traffic.
fn operstate_is_up(state: &str) -> bool {
    matches!(state, "up" | "unknown")
}

/// First interface in `/proc/net/route` with a zero destination and mask.
fn default_route_interface(route: &str) -> Option<String> {
    route.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [iface, "00000000", _gateway, _flags, _refcnt, _use, _metric, "00000000", ..] => {
                Some(iface.to_string())
            }
            _ => None,
        }
    })
}

/// Link quality column for `iface` in `/proc/net/wireless`.
fn wireless_link_quality(wireless: &str, iface: &str) -> Option<f64> {
    wireless.lines().skip(2).find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != iface {
            return None;
        }
        let link = rest.split_whitespace().nth(1)?;
        link.trim_end_matches('.').parse().ok()
    })
}

/// Map link quality onto the 0–4 bar scale.
fn signal_ordinal(link_quality: f64) -> u8 {
    let ratio = (link_quality / MAX_LINK_QUALITY).clamp(0.0, 1.0);
    (ratio * 4.0).round() as u8
}
