//! Global settings table through the `settings` shell command.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use dualsim_failover::PlatformError;
use dualsim_failover::platform::SettingsStore;

pub struct ShellSettingsStore {
    command: String,
    /// Cleared once a write is refused for lack of permission.
    writable: AtomicBool,
}

impl ShellSettingsStore {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            writable: AtomicBool::new(true),
        }
    }
}

impl SettingsStore for ShellSettingsStore {
    fn get_int(&self, key: &str, default: i64) -> Result<i64, PlatformError> {
        let output = Command::new(&self.command)
            .args(["get", "global", key])
            .output()?;
        if !output.status.success() {
            return Err(PlatformError::Unavailable(format!(
                "{} get global {key} exited with {}",
                self.command, output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_setting(&stdout).unwrap_or(default))
    }

    fn put_int(&self, key: &str, value: i64) -> Result<bool, PlatformError> {
        let output = Command::new(&self.command)
            .args(["put", "global", key, &value.to_string()])
            .output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_permission_denial(&stderr) {
            warn!(key, "settings write denied");
            self.writable.store(false, Ordering::Relaxed);
            return Err(PlatformError::PermissionDenied(stderr.trim().to_string()));
        }
        if !output.status.success() {
            debug!(key, status = %output.status, "settings put rejected");
        }
        Ok(output.status.success())
    }

    fn can_write(&self) -> bool {
        self.writable.load(Ordering::Relaxed)
    }
}

/// `settings get` prints the value or `null`.
fn parse_setting(stdout: &str) -> Option<i64> {
    let value = stdout.trim();
    if value.is_empty() || value == "null" {
        return None;
    }
    value.parse().ok()
}

fn is_permission_denial(stderr: &str) -> bool {
    stderr.contains("SecurityException") || stderr.contains("Permission denial")
}
