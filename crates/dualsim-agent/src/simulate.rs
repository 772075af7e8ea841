//! `--simulate`: run against the in-memory device, with link conditions
//! replayed from a seeded scenario in real time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use dualsim_failover::Platform;
use dualsim_failover::platform::EventSink;
use dualsim_sim::{Scenario, ScenarioConfig, SimDevice};

pub struct SimulatedHost {
    pub device: Arc<SimDevice>,
    stop: Arc<AtomicBool>,
    driver: Option<thread::JoinHandle<()>>,
}

impl SimulatedHost {
    /// Start replaying a scenario. It loops when the frames run out.
    pub fn start(seed: u64, step: Duration) -> Self {
        let device = Arc::new(SimDevice::new());
        let cfg = ScenarioConfig {
            seed,
            step,
            ..ScenarioConfig::default()
        };
        let frames = Scenario::new(cfg).frames();
        info!(seed, frames = frames.len(), "simulated device ready");

        let stop = Arc::new(AtomicBool::new(false));
        let driver = {
            let device = device.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("dualsim-scenario".into())
                .spawn(move || {
                    for frame in frames.iter().cycle() {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        debug!(t_ms = frame.t.as_millis() as u64, "scenario frame");
                        frame.apply(&device);
                        thread::sleep(step);
                    }
                })
                .expect("failed to spawn scenario thread")
        };

        Self {
            device,
            stop,
            driver: Some(driver),
        }
    }

    pub fn platform(&self, events: Arc<dyn EventSink>) -> Platform {
        self.device.platform(events)
    }
}

impl Drop for SimulatedHost {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
    }
}
