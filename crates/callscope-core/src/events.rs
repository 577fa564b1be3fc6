//! New-call notifications
//!
//! Every newly created record is published on a broadcast channel.
//! Delivery is fire-and-forget: a receiver that falls behind loses
//! messages and is expected to catch up through a snapshot.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::record::CallRecord;

/// Notification payload for a newly captured call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCallEvent {
    pub new_record: CallRecord,
}

/// Publisher side of the new-call channel
#[derive(Clone)]
pub struct CallNotifier {
    tx: broadcast::Sender<NewCallEvent>,
}

impl CallNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all attached receivers. Never blocks.
    ///
    /// Returns the number of receivers reached.
    pub fn notify(&self, record: &CallRecord) -> usize {
        self.tx
            .send(NewCallEvent {
                new_record: record.clone(),
            })
            .unwrap_or(0)
    }

    /// Attach a receiver for every notification sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<NewCallEvent> {
        self.tx.subscribe()
    }
}
