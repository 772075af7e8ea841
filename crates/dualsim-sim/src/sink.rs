use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use dualsim_common::protocol::FailoverEvent;
use dualsim_failover::platform::EventSink;

/// Event sink that keeps every event for later inspection.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    tx: Sender<FailoverEvent>,
    rx: Receiver<FailoverEvent>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Everything emitted so far, oldest first.
    pub fn drain(&self) -> Vec<FailoverEvent> {
        self.rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FailoverEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn receiver(&self) -> Receiver<FailoverEvent> {
        self.rx.clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: FailoverEvent) {
        tracing::debug!(event = event.name(), "recorded");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualsim_common::models::SlotIndex;

    #[test]
    fn drains_in_order() {
        let sink = RecordingSink::new();
        sink.emit(FailoverEvent::sim_switched(SlotIndex::SECOND));
        sink.emit(FailoverEvent::network_restored(SlotIndex::SECOND));
        let names: Vec<_> = sink.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, ["simSwitched", "networkRestored"]);
        assert!(sink.drain().is_empty());
    }
}
