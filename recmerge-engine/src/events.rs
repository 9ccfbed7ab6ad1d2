//! Merge outcome notifications.

use recmerge_model::{Actor, Record};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum MergeEvent {
    /// A queued merge committed.
    RecordMerged {
        source: Record,
        target: Record,
        performed_by: Option<Actor>,
    },
    /// A queued merge failed and was rolled back.
    RecordMergeFailed {
        source: Record,
        target: Record,
        performed_by: Option<Actor>,
        error: Option<String>,
    },
}

impl MergeEvent {
    pub fn source(&self) -> &Record {
        match self {
            Self::RecordMerged { source, .. } | Self::RecordMergeFailed { source, .. } => source,
        }
    }

    pub fn target(&self) -> &Record {
        match self {
            Self::RecordMerged { target, .. } | Self::RecordMergeFailed { target, .. } => target,
        }
    }
}

/// Broadcast channel for [`MergeEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MergeEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MergeEvent> {
        self.sender.subscribe()
    }

    /// Sends to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: MergeEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Merge event dropped, no subscribers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
