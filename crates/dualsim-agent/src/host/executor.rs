//! Superuser command execution via `su -c`.

use std::process::{Command, Stdio};
use std::sync::OnceLock;

use tracing::{debug, info};

use dualsim_failover::PlatformError;
use dualsim_failover::platform::PrivilegedExecutor;

pub struct SuExecutor {
    su: String,
    elevated: OnceLock<bool>,
}

impl SuExecutor {
    pub fn new(su: impl Into<String>) -> Self {
        Self {
            su: su.into(),
            elevated: OnceLock::new(),
        }
    }

    fn run(&self, command: &str) -> std::io::Result<i32> {
        let status = Command::new(&self.su)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        // Killed by a signal: no exit code.
        Ok(status.code().unwrap_or(-1))
    }
}

impl PrivilegedExecutor for SuExecutor {
    fn run_elevated(&self, command: &str) -> Result<i32, PlatformError> {
        if !self.is_elevated_available() {
            return Err(PlatformError::PermissionDenied(format!("{} is not usable", self.su)));
        }
        let code = self.run(command)?;
        debug!(command, code, "elevated command finished");
        Ok(code)
    }

    /// Probed once by running `exit` elevated.
    fn is_elevated_available(&self) -> bool {
        *self.elevated.get_or_init(|| {
            let ok = matches!(self.run("exit"), Ok(0));
            info!(su = %self.su, elevated = ok, "elevation probe");
            ok
        })
    }
}
