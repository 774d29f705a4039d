//! Advisory notifications surfaced to the user interface

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    FileUploaded,
    CallConnected,
    CallFailed,
    CallEnded,
    PoorConnection,
    RecordingStarted,
    RecordingStopped,
    ScreenShareStarted,
    ScreenShareStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub title: String,
    pub description: String,
}

impl Advisory {
    pub fn new(kind: AdvisoryKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Fire-and-forget sink for advisories. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, advisory: Advisory);
}

/// Forwards advisories into an unbounded channel drained by the surface.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Advisory>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Advisory>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, advisory: Advisory) {
        // A closed receiver means nobody is displaying advisories anymore.
        if self.sender.send(advisory).is_err() {
            tracing::debug!("Advisory dropped, receiver closed");
        }
    }
}

/// Writes advisories to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, advisory: Advisory) {
        tracing::info!(kind = ?advisory.kind, "{}: {}", advisory.title, advisory.description);
    }
}

/// Keeps every advisory in memory.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    received: Mutex<Vec<Advisory>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advisories(&self) -> Vec<Advisory> {
        self.received.lock().clone()
    }

    pub fn count(&self, kind: AdvisoryKind) -> usize {
        self.received.lock().iter().filter(|a| a.kind == kind).count()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, advisory: Advisory) {
        self.received.lock().push(advisory);
    }
}
