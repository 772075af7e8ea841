//! JSON-lines event output.
//!
//! Each event is wrapped in an [`Envelope`] and written as one line, to
//! stdout or appended to a file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::Context;

use dualsim_common::protocol::{Envelope, FailoverEvent};
use dualsim_failover::platform::EventSink;

pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening event log {path}"))?;
        Ok(Self::new(Box::new(file)))
    }

    fn write_line(&self, event: &FailoverEvent) -> anyhow::Result<()> {
        let envelope = Envelope::for_event(event)?;
        let line = serde_json::to_string(&envelope)?;
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: FailoverEvent) {
        tracing::info!(event = event.name(), "failover event");
        if let Err(e) = self.write_line(&event) {
            tracing::warn!(error = %e, "failed to write event");
        }
    }
}
