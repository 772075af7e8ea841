//! Agent configuration file.
//!
//! The engine's own sections (`[monitor]`, `[probe]`, `[switch]`) sit at the
//! top level; the agent adds the slot-to-link table and the host commands
//! its adapters shell out to.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use dualsim_common::models::{LinkId, SlotIndex};
use dualsim_failover::config::{FailoverConfig, FailoverConfigInput};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfigInput {
    #[serde(flatten)]
    pub failover: FailoverConfigInput,
    pub links: Vec<LinkInput>,
    pub platform: PlatformInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub slot: u8,
    pub link_id: Option<i64>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformInput {
    pub settings_command: Option<String>,
    pub elevation_command: Option<String>,
    pub watch_interval_ms: Option<u64>,
    pub events_path: Option<String>,
}

/// One SIM slot as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub slot: SlotIndex,
    pub link_id: LinkId,
    /// Network interface carrying this slot's data, if known.
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub settings_command: String,
    pub elevation_command: String,
    pub watch_interval: Duration,
    /// Where to append JSON-lines events. Stdout when unset.
    pub events_path: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            settings_command: "settings".into(),
            elevation_command: "su".into(),
            watch_interval: Duration::from_millis(1000),
            events_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub failover: FailoverConfig,
    pub links: Vec<LinkConfig>,
    pub platform: PlatformConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            failover: FailoverConfig::default(),
            links: default_links(),
            platform: PlatformConfig::default(),
        }
    }
}

/// Link ids 1 and 2 on `wwan0` and `wwan1`.
fn default_links() -> Vec<LinkConfig> {
    SlotIndex::ALL
        .into_iter()
        .map(|slot| LinkConfig {
            slot,
            link_id: LinkId(slot.get() as i64 + 1),
            interface: Some(format!("wwan{}", slot.get())),
        })
        .collect()
}

impl AgentConfigInput {
    pub fn resolve(self) -> anyhow::Result<AgentConfig> {
        let failover = self
            .failover
            .resolve()
            .map_err(anyhow::Error::msg)
            .context("invalid failover settings")?;

        let links = if self.links.is_empty() {
            default_links()
        } else {
            let mut links: Vec<LinkConfig> = Vec::with_capacity(self.links.len());
            for input in self.links {
                let slot = SlotIndex::new(input.slot)?;
                if links.iter().any(|l| l.slot == slot) {
                    bail!("slot {slot} is listed twice in [[links]]");
                }
                let link_id = LinkId(input.link_id.unwrap_or(slot.get() as i64 + 1));
                if links.iter().any(|l| l.link_id == link_id) {
                    bail!("link id {link_id} is listed twice in [[links]]");
                }
                links.push(LinkConfig {
                    slot,
                    link_id,
                    interface: input.interface.filter(|s| !s.trim().is_empty()),
                });
            }
            links.sort_by_key(|l| l.slot);
            links
        };

        let defaults = PlatformConfig::default();
        let platform = PlatformConfig {
            settings_command: self
                .platform
                .settings_command
                .unwrap_or(defaults.settings_command),
            elevation_command: self
                .platform
                .elevation_command
                .unwrap_or(defaults.elevation_command),
            watch_interval: self
                .platform
                .watch_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.watch_interval),
            events_path: self.platform.events_path,
        };
        if platform.watch_interval.is_zero() {
            bail!("platform.watch_interval_ms must be positive");
        }

        Ok(AgentConfig {
            failover,
            links,
            platform,
        })
    }
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(AgentConfig::default());
        }
        let parsed: AgentConfigInput = toml::from_str(input).context("invalid config TOML")?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading config {}", path.display()))
    }
}
