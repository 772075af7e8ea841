//! Active reachability: `ping` binary and a blocking HTTP GET.

use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;

use dualsim_failover::PlatformError;
use dualsim_failover::platform::Reachability;

pub struct SystemReachability {
    http: reqwest::blocking::Client,
}

impl SystemReachability {
    pub fn new() -> Result<Self, PlatformError> {
        let http = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PlatformError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { http })
    }
}

impl Reachability for SystemReachability {
    fn ping(&self, host: &str, timeout: Duration) -> Result<bool, PlatformError> {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", &ping_wait_secs(timeout).to_string(), host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    fn http_check(&self, url: &str, timeout: Duration) -> Result<bool, PlatformError> {
        match self.http.get(url).timeout(timeout).send() {
            Ok(resp) => Ok(is_connectivity_response(resp.status().as_u16())),
            Err(e) => {
                debug!(url, error = %e, "http check failed");
                Ok(false)
            }
        }
    }
}

/// `ping -W` takes whole seconds; never pass zero.
fn ping_wait_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

fn is_connectivity_response(status: u16) -> bool {
    status == 200 || status == 204
}
