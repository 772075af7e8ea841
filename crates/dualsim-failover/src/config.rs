use std::time::Duration;

use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

/// Key the platform reads to decide which link carries mobile data.
pub const DEFAULT_ACTIVE_KEY: &str = "multi_sim_data_call";

/// Settings keys tried by the settings-write strategy, in order. The key
/// that actually takes effect varies by platform build.
pub const DEFAULT_SETTINGS_KEYS: [&str; 5] = [
    DEFAULT_ACTIVE_KEY,
    "user_preferred_data_sub",
    "mobile_data_preferred_sub_id",
    "preferred_data_subscription",
    "default_data_sub_id",
];

/// Per-slot legacy keys reported in status snapshots.
pub const LEGACY_STATUS_KEYS: [&str; 3] = ["mobile_data", "mobile_data0", "mobile_data1"];

/// Function codes for `service call phone`, tried in order.
pub const DEFAULT_SERVICE_CALL_CODES: [u32; 5] = [193, 194, 27, 28, 180];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailoverConfigInput {
    pub version: u32,
    pub monitor: MonitorConfigInput,
    pub probe: ProbeConfigInput,
    pub switch: SwitchConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfigInput {
    pub check_interval_ms: Option<u64>,
    pub loss_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfigInput {
    pub timeout_ms: Option<u64>,
    pub active_probes: Option<bool>,
    pub ping_host: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SwitchConfigInput {
    pub settings_keys: Option<Vec<String>>,
    pub active_key: Option<String>,
    pub settle_ms: Option<u64>,
    pub service_call_codes: Option<Vec<u32>>,
    pub privileged_settle_ms: Option<u64>,
    pub reflective_settle_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Period of the polling timer.
    pub check_interval: Duration,
    /// Consecutive loss signals before the link is declared lost.
    pub loss_threshold: u32,
    /// Minimum time between two successful switches.
    pub cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(5000),
            loss_threshold: 3,
            cooldown: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Bound for each reachability sub-probe.
    pub timeout: Duration,
    /// Run ping and HTTP checks alongside the OS verdict.
    pub active_probes: bool,
    pub ping_host: String,
    pub http_url: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            active_probes: true,
            ping_host: "google.com".into(),
            http_url: "http://connectivitycheck.gstatic.com/generate_204".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchConfig {
    pub settings_keys: Vec<String>,
    pub active_key: String,
    pub settle: Duration,
    pub service_call_codes: Vec<u32>,
    pub privileged_settle: Duration,
    pub reflective_settle: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            settings_keys: DEFAULT_SETTINGS_KEYS.iter().map(|k| k.to_string()).collect(),
            active_key: DEFAULT_ACTIVE_KEY.into(),
            settle: Duration::from_millis(500),
            service_call_codes: DEFAULT_SERVICE_CALL_CODES.to_vec(),
            privileged_settle: Duration::from_millis(500),
            reflective_settle: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailoverConfig {
    pub monitor: MonitorConfig,
    pub probe: ProbeConfig,
    pub switch: SwitchConfig,
}

impl FailoverConfigInput {
    pub fn resolve(self) -> Result<FailoverConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let monitor_defaults = MonitorConfig::default();
        let check_interval_ms = self
            .monitor
            .check_interval_ms
            .unwrap_or(monitor_defaults.check_interval.as_millis() as u64);
        if check_interval_ms < 100 {
            return Err(format!(
                "monitor.check_interval_ms must be at least 100, got {}",
                check_interval_ms
            ));
        }
        let loss_threshold = self
            .monitor
            .loss_threshold
            .unwrap_or(monitor_defaults.loss_threshold);
        if loss_threshold == 0 {
            return Err("monitor.loss_threshold must be at least 1".into());
        }
        let monitor = MonitorConfig {
            check_interval: Duration::from_millis(check_interval_ms),
            loss_threshold,
            cooldown: self
                .monitor
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(monitor_defaults.cooldown),
        };

        let probe_defaults = ProbeConfig::default();
        let probe = ProbeConfig {
            timeout: self
                .probe
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(probe_defaults.timeout),
            active_probes: self.probe.active_probes.unwrap_or(probe_defaults.active_probes),
            ping_host: non_empty(self.probe.ping_host).unwrap_or(probe_defaults.ping_host),
            http_url: non_empty(self.probe.http_url).unwrap_or(probe_defaults.http_url),
        };

        let switch_defaults = SwitchConfig::default();
        let active_key = non_empty(self.switch.active_key).unwrap_or(switch_defaults.active_key);
        let mut settings_keys: Vec<String> = Vec::new();
        for key in self
            .switch
            .settings_keys
            .unwrap_or(switch_defaults.settings_keys)
        {
            let key = key.trim().to_string();
            if !key.is_empty() && !settings_keys.contains(&key) {
                settings_keys.push(key);
            }
        }
        // The verification read-back only works if the active key is written.
        if !settings_keys.contains(&active_key) {
            settings_keys.insert(0, active_key.clone());
        }
        let service_call_codes = self
            .switch
            .service_call_codes
            .unwrap_or(switch_defaults.service_call_codes);

        let switch = SwitchConfig {
            settings_keys,
            active_key,
            settle: self
                .switch
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(switch_defaults.settle),
            service_call_codes,
            privileged_settle: self
                .switch
                .privileged_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(switch_defaults.privileged_settle),
            reflective_settle: self
                .switch
                .reflective_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(switch_defaults.reflective_settle),
        };

        Ok(FailoverConfig {
            monitor,
            probe,
            switch,
        })
    }
}

impl FailoverConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(FailoverConfig::default());
        }
        let parsed: FailoverConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }

    /// Defaults with every delay collapsed, for tests and simulation.
    pub fn immediate() -> Self {
        let mut cfg = FailoverConfig::default();
        cfg.switch.settle = Duration::ZERO;
        cfg.switch.privileged_settle = Duration::ZERO;
        cfg.switch.reflective_settle = Duration::ZERO;
        cfg
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
