//! Request lifecycle events and the sources that deliver them
//!
//! A source emits three kinds of notification per request, in no
//! guaranteed order and with no guarantee that all three arrive. The
//! engine subscribes to a source through [`EventSource::subscribe`] and
//! owns the receiver for as long as capture is running.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::record::HttpHeader;

/// Default capacity of a [`ChannelEventSource`]
const DEFAULT_CAPACITY: usize = 1024;

/// One uploaded chunk of a raw request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Body as reported by the interception layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBodyDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<UploadChunk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<BTreeMap<String, Vec<String>>>,
}

/// A request is about to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStartDetails {
    pub request_id: String,
    pub url: String,
    pub method: String,
    /// Milliseconds since the UNIX epoch
    pub time_stamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBodyDetails>,
}

/// Request headers are about to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeadersDetails {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
}

/// The response has been fully received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompletedDetails {
    pub request_id: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
}

/// Any of the three lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    RequestStart(RequestStartDetails),
    RequestHeaders(RequestHeadersDetails),
    RequestCompleted(RequestCompletedDetails),
}

impl LifecycleEvent {
    pub fn request_id(&self) -> &str {
        match self {
            LifecycleEvent::RequestStart(d) => &d.request_id,
            LifecycleEvent::RequestHeaders(d) => &d.request_id,
            LifecycleEvent::RequestCompleted(d) => &d.request_id,
        }
    }

    /// Short kind label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::RequestStart(_) => "start",
            LifecycleEvent::RequestHeaders(_) => "headers",
            LifecycleEvent::RequestCompleted(_) => "completed",
        }
    }
}

/// Something that can deliver lifecycle events to subscribers
///
/// Each call to `subscribe` yields an independent receiver; dropping the
/// receiver detaches it.
pub trait EventSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// In-process event source backed by a broadcast channel
///
/// Used by tests and by the CLI replay command to push recorded events
/// into an engine.
#[derive(Clone)]
pub struct ChannelEventSource {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to every attached subscriber.
    ///
    /// Returns the number of subscribers reached (0 when nothing is
    /// attached; the event is then dropped).
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}
