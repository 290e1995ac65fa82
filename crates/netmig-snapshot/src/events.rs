//! Progress events emitted during a run.

use crate::{Outcome, Phase};
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress of a snapshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        label: String,
        phase: Phase,
        devices: usize,
    },
    DeviceStarted {
        device: String,
    },
    DeviceConnected {
        device: String,
        prompt: Option<String>,
    },
    CommandFinished {
        device: String,
        command: String,
        outcome: Outcome,
    },
    DeviceFinished {
        device: String,
        succeeded: usize,
        total: usize,
    },
    RunFinished {
        run_id: String,
        cancelled: bool,
    },
}

/// Optional, non-blocking event sender.
///
/// Sending never waits; a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: Option<mpsc::UnboundedSender<RunEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(Some(tx));
        sink.emit(RunEvent::DeviceStarted {
            device: "r1".to_string(),
        });
        EventSink::default().emit(RunEvent::DeviceStarted {
            device: "r1".to_string(),
        });
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(RunEvent::DeviceFinished {
            device: "r1".to_string(),
            succeeded: 2,
            total: 3,
        })
        .unwrap();
        assert_eq!(json["event"], "device_finished");
        assert_eq!(json["total"], 3);
    }
}
