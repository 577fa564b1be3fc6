//! Capture engine
//!
//! The engine owns the call log and the capture flag. While capture is
//! running it holds a subscription on an [`EventSource`] and correlates
//! the start, header and completion events of each request into a single
//! [`CallRecord`].
//!
//! All state lives behind one async mutex. Every mutation and the write
//! that persists it happen inside a single lock acquisition, so persisted
//! writes land in the same order as in-memory changes and a cleared log
//! can never be resurrected by an in-flight event.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;
use crate::events::{CallNotifier, NewCallEvent};
use crate::record::{format_timestamp, CallRecord, RequestBody};
use crate::source::{
    EventSource, LifecycleEvent, RequestCompletedDetails, RequestHeadersDetails,
    RequestStartDetails,
};
use crate::storage::{load_json, save_json, PersistentStore, API_CALLS_KEY, CAPTURE_ENABLED_KEY};

/// Whether capture is currently enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureState {
    pub enabled: bool,
}

/// What an event did to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A new record was created
    Recorded,
    /// A late-bound field of an existing record was filled in
    Updated,
    /// The start event's URL matched the exclusion policy
    Excluded,
    /// No record carries this request id
    Unmatched,
    /// The targeted field was already set
    Duplicate,
    /// Capture is stopped, or the event came from a detached subscription
    Inactive,
}

/// Live subscription on the event source
struct Subscription {
    generation: u64,
    task: JoinHandle<()>,
}

struct EngineState {
    log: Vec<CallRecord>,
    enabled: bool,
    subscription: Option<Subscription>,
    next_generation: u64,
}

struct EngineInner {
    config: CaptureConfig,
    store: Arc<dyn PersistentStore>,
    source: Arc<dyn EventSource>,
    notifier: CallNotifier,
    state: Mutex<EngineState>,
}

/// Which check an event must pass before it is applied
#[derive(Clone, Copy)]
enum Gate {
    /// Delivered by the pump of this subscription generation
    Subscription(u64),
    /// Injected directly; applied while capture is enabled
    Enabled,
}

/// Capture-and-correlation engine
///
/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<EngineInner>,
}

impl CaptureEngine {
    /// Build an engine, restoring the log and capture flag from `store`.
    ///
    /// Unreadable persisted state is logged and replaced by defaults
    /// (empty log, capture enabled). If capture is enabled the engine
    /// subscribes to `source` before returning.
    pub async fn new(
        config: CaptureConfig,
        store: Arc<dyn PersistentStore>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        let mut log = match load_json::<Vec<CallRecord>>(store.as_ref(), API_CALLS_KEY).await {
            Ok(log) => log.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to restore call log, starting empty: {}", e);
                Vec::new()
            }
        };
        if config.is_capped() && log.len() > config.max_records {
            log.truncate(config.max_records);
        }

        let enabled = match load_json::<bool>(store.as_ref(), CAPTURE_ENABLED_KEY).await {
            Ok(enabled) => enabled.unwrap_or(true),
            Err(e) => {
                tracing::warn!("Failed to restore capture state, defaulting to enabled: {}", e);
                true
            }
        };

        tracing::info!(
            "Capture engine restored {} records (capture {})",
            log.len(),
            if enabled { "enabled" } else { "disabled" }
        );

        let notifier = CallNotifier::new(config.notify_capacity);
        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                source,
                notifier,
                state: Mutex::new(EngineState {
                    log,
                    enabled,
                    subscription: None,
                    next_generation: 0,
                }),
            }),
        };

        if enabled {
            let mut state = engine.inner.state.lock().await;
            engine.attach(&mut state);
        }

        engine
    }

    /// Owned copy of the log, newest first
    pub async fn snapshot(&self) -> Vec<CallRecord> {
        self.inner.state.lock().await.log.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn capture_state(&self) -> CaptureState {
        CaptureState {
            enabled: self.inner.state.lock().await.enabled,
        }
    }

    /// Whether a subscription on the event source is currently held
    pub async fn is_attached(&self) -> bool {
        self.inner.state.lock().await.subscription.is_some()
    }

    /// Enable capture, persist the flag and subscribe (once)
    pub async fn start_capture(&self) -> CaptureState {
        let mut state = self.inner.state.lock().await;
        state.enabled = true;
        self.inner.persist_enabled(true).await;
        self.attach(&mut state);

        CaptureState { enabled: true }
    }

    /// Disable capture, persist the flag and detach the subscription.
    ///
    /// Once this returns no event from the old subscription will touch
    /// the log.
    pub async fn stop_capture(&self) -> CaptureState {
        let subscription = {
            let mut state = self.inner.state.lock().await;
            state.enabled = false;
            self.inner.persist_enabled(false).await;
            state.subscription.take()
        };

        if let Some(subscription) = subscription {
            subscription.task.abort();
            // Wait for the pump to drop its receiver
            let _ = subscription.task.await;
            tracing::info!(
                "Capture stopped, detached subscription {}",
                subscription.generation
            );
        }

        CaptureState { enabled: false }
    }

    /// Empty the log and persist the empty log before returning
    pub async fn clear_all(&self) -> Vec<CallRecord> {
        let mut state = self.inner.state.lock().await;
        let cleared = state.log.len();
        state.log.clear();
        self.inner.persist_log(&state.log).await;

        tracing::info!("Cleared {} captured calls", cleared);
        Vec::new()
    }

    /// Receive a notification for every record created from now on
    pub fn subscribe_calls(&self) -> broadcast::Receiver<NewCallEvent> {
        self.inner.notifier.subscribe()
    }

    /// Apply an event directly, bypassing the event source.
    ///
    /// Honored only while capture is enabled.
    pub async fn handle_event(&self, event: LifecycleEvent) -> EventOutcome {
        self.inner.apply(Gate::Enabled, event).await
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    fn attach(&self, state: &mut EngineState) {
        if state.subscription.is_some() {
            return;
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let rx = self.inner.source.subscribe();
        let task = tokio::spawn(pump(Arc::downgrade(&self.inner), generation, rx));
        state.subscription = Some(Subscription { generation, task });

        tracing::info!("Capture started, subscription {}", generation);
    }
}

/// Forward events from one subscription into the engine
async fn pump(inner: Weak<EngineInner>, generation: u64, mut rx: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.apply(Gate::Subscription(generation), event).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event source lagged, {} lifecycle events lost", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

impl EngineInner {
    async fn apply(&self, gate: Gate, event: LifecycleEvent) -> EventOutcome {
        let mut state = self.state.lock().await;

        let live = match gate {
            Gate::Subscription(generation) => {
                state.subscription.as_ref().map(|s| s.generation) == Some(generation)
            }
            Gate::Enabled => state.enabled,
        };
        if !live {
            tracing::trace!(
                "Dropping {} event for {} (capture inactive)",
                event.kind(),
                event.request_id()
            );
            return EventOutcome::Inactive;
        }

        match event {
            LifecycleEvent::RequestStart(details) => self.on_request_start(&mut state, details).await,
            LifecycleEvent::RequestHeaders(details) => {
                self.on_request_headers(&mut state, details).await
            }
            LifecycleEvent::RequestCompleted(details) => {
                self.on_request_completed(&mut state, details).await
            }
        }
    }

    async fn on_request_start(
        &self,
        state: &mut EngineState,
        details: RequestStartDetails,
    ) -> EventOutcome {
        if self.config.exclusion.is_excluded(&details.url) {
            tracing::trace!("Excluded request {} to {}", details.request_id, details.url);
            return EventOutcome::Excluded;
        }

        let record = CallRecord::new(
            details.request_id,
            details.url,
            details.method,
            format_timestamp(details.time_stamp),
            RequestBody::decode(details.request_body.as_ref()),
        );
        tracing::debug!(
            "Recorded {} {} ({})",
            record.method,
            record.url,
            record.request_id
        );

        state.log.insert(0, record.clone());
        if self.config.is_capped() && state.log.len() > self.config.max_records {
            let evicted = state.log.len() - self.config.max_records;
            state.log.truncate(self.config.max_records);
            tracing::debug!("Evicted {} oldest records", evicted);
        }

        self.persist_log(&state.log).await;
        self.notifier.notify(&record);

        EventOutcome::Recorded
    }

    async fn on_request_headers(
        &self,
        state: &mut EngineState,
        details: RequestHeadersDetails,
    ) -> EventOutcome {
        let Some(record) = find_record(&mut state.log, &details.request_id) else {
            tracing::trace!("No record for headers of {}", details.request_id);
            return EventOutcome::Unmatched;
        };

        if !record.set_request_headers(details.request_headers) {
            return EventOutcome::Duplicate;
        }

        self.persist_log(&state.log).await;
        EventOutcome::Updated
    }

    async fn on_request_completed(
        &self,
        state: &mut EngineState,
        details: RequestCompletedDetails,
    ) -> EventOutcome {
        let Some(record) = find_record(&mut state.log, &details.request_id) else {
            tracing::trace!("No record for completion of {}", details.request_id);
            return EventOutcome::Unmatched;
        };

        if !record.set_response(details.status_code, details.response_headers) {
            return EventOutcome::Duplicate;
        }

        self.persist_log(&state.log).await;
        EventOutcome::Updated
    }

    async fn persist_log(&self, log: &[CallRecord]) {
        if let Err(e) = save_json(self.store.as_ref(), API_CALLS_KEY, log).await {
            tracing::warn!("Failed to persist call log: {}", e);
        }
    }

    async fn persist_enabled(&self, enabled: bool) {
        if let Err(e) = save_json(self.store.as_ref(), CAPTURE_ENABLED_KEY, &enabled).await {
            tracing::warn!("Failed to persist capture state: {}", e);
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(subscription) = self.state.get_mut().subscription.take() {
            subscription.task.abort();
        }
    }
}

/// First record (in log order) with this request id
fn find_record<'a>(log: &'a mut [CallRecord], request_id: &str) -> Option<&'a mut CallRecord> {
    log.iter_mut().find(|r| r.request_id == request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExclusionPolicy;
    use crate::error::{AppError, Result};
    use crate::record::HttpHeader;
    use crate::source::{ChannelEventSource, RequestBodyDetails, UploadChunk};
    use crate::storage::{MemoryStore, SledStore};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    fn start(id: &str, url: &str, method: &str) -> LifecycleEvent {
        LifecycleEvent::RequestStart(RequestStartDetails {
            request_id: id.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            time_stamp: 1_700_000_000_000.0,
            request_body: None,
        })
    }

    fn headers(id: &str, headers: Option<Vec<HttpHeader>>) -> LifecycleEvent {
        LifecycleEvent::RequestHeaders(RequestHeadersDetails {
            request_id: id.to_string(),
            request_headers: headers,
        })
    }

    fn completed(id: &str, status: u16, headers: Option<Vec<HttpHeader>>) -> LifecycleEvent {
        LifecycleEvent::RequestCompleted(RequestCompletedDetails {
            request_id: id.to_string(),
            status_code: status,
            response_headers: headers,
        })
    }

    async fn engine_with(
        config: CaptureConfig,
        store: Arc<dyn PersistentStore>,
    ) -> (CaptureEngine, ChannelEventSource) {
        let source = ChannelEventSource::new();
        let engine = CaptureEngine::new(config, store, Arc::new(source.clone())).await;
        (engine, source)
    }

    async fn engine() -> (CaptureEngine, ChannelEventSource) {
        engine_with(CaptureConfig::default(), Arc::new(MemoryStore::new())).await
    }

    async fn next_call(rx: &mut broadcast::Receiver<NewCallEvent>) -> CallRecord {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .unwrap()
            .new_record
    }

    /// Store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl PersistentStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }

        async fn set(&self, key: &str, _value: serde_json::Value) -> Result<()> {
            Err(AppError::StorageError(format!("quota exceeded writing {key}")))
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_scenario() {
        let (engine, _source) = engine().await;

        let outcome = engine
            .handle_event(start("1", "https://api.example.com/users", "GET"))
            .await;
        assert_eq!(outcome, EventOutcome::Recorded);

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status_code, None);
        assert_eq!(snapshot[0].request_body, None);

        let auth = vec![HttpHeader::new("Authorization", "Bearer x")];
        engine.handle_event(headers("1", Some(auth.clone()))).await;
        assert_eq!(engine.snapshot().await[0].request_headers, Some(auth.clone()));

        let content_type = vec![HttpHeader::new("Content-Type", "application/json")];
        engine
            .handle_event(completed("1", 200, Some(content_type.clone())))
            .await;

        let record = &engine.snapshot().await[0];
        assert_eq!(record.status_code, Some(200));
        assert_eq!(record.response_headers, Some(content_type));
        assert_eq!(record.request_headers, Some(auth));
        assert_eq!(record.url, "https://api.example.com/users");
        assert_eq!(record.method, "GET");
        assert_eq!(record.timestamp, format_timestamp(1_700_000_000_000.0));
    }

    #[tokio::test]
    async fn test_completion_before_headers() {
        let (engine, _source) = engine().await;

        engine.handle_event(start("1", "https://api.example.com/a", "POST")).await;
        engine.handle_event(completed("1", 500, None)).await;
        assert_eq!(engine.snapshot().await[0].request_headers, None);

        engine.handle_event(headers("1", None)).await;
        let record = &engine.snapshot().await[0];
        assert_eq!(record.status_code, Some(500));
        assert_eq!(record.response_headers, Some(vec![]));
        assert_eq!(record.request_headers, Some(vec![]));
    }

    #[tokio::test]
    async fn test_late_fields_set_exactly_once() {
        let (engine, _source) = engine().await;
        engine.handle_event(start("1", "https://api.example.com/a", "GET")).await;

        let first = vec![HttpHeader::new("Accept", "text/html")];
        assert_eq!(
            engine.handle_event(headers("1", Some(first.clone()))).await,
            EventOutcome::Updated
        );
        assert_eq!(
            engine
                .handle_event(headers("1", Some(vec![HttpHeader::new("Accept", "*/*")])))
                .await,
            EventOutcome::Duplicate
        );

        engine.handle_event(completed("1", 200, None)).await;
        assert_eq!(
            engine.handle_event(completed("1", 404, None)).await,
            EventOutcome::Duplicate
        );

        let record = &engine.snapshot().await[0];
        assert_eq!(record.request_headers, Some(first));
        assert_eq!(record.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_excluded_urls_create_nothing() {
        let (engine, _source) = engine().await;

        assert_eq!(
            engine
                .handle_event(start("1", "https://cdn.example.com/app.js", "GET"))
                .await,
            EventOutcome::Excluded
        );
        assert_eq!(
            engine
                .handle_event(start("2", "chrome-extension://abc/popup.html", "GET"))
                .await,
            EventOutcome::Excluded
        );
        assert!(engine.is_empty().await);

        assert_eq!(
            engine.handle_event(headers("1", None)).await,
            EventOutcome::Unmatched
        );
        assert_eq!(
            engine.handle_event(completed("2", 200, None)).await,
            EventOutcome::Unmatched
        );
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_custom_exclusion_policy() {
        let config = CaptureConfig::default().with_exclusion(ExclusionPolicy::none());
        let (engine, _source) = engine_with(config, Arc::new(MemoryStore::new())).await;

        engine.handle_event(start("1", "https://cdn.example.com/api", "GET")).await;
        assert_eq!(engine.len().await, 1);
    }

    #[tokio::test]
    async fn test_log_is_newest_first() {
        let (engine, _source) = engine().await;
        engine.handle_event(start("1", "https://api.example.com/1", "GET")).await;
        engine.handle_event(start("2", "https://api.example.com/2", "GET")).await;
        engine.handle_event(start("3", "https://api.example.com/3", "GET")).await;

        let ids: Vec<String> = engine
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_updates_first_match() {
        let (engine, _source) = engine().await;
        engine.handle_event(start("1", "https://api.example.com/old", "GET")).await;
        engine.handle_event(start("1", "https://api.example.com/new", "GET")).await;

        engine.handle_event(completed("1", 201, None)).await;
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot[0].url, "https://api.example.com/new");
        assert_eq!(snapshot[0].status_code, Some(201));
        assert_eq!(snapshot[1].status_code, None);
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let config = CaptureConfig::default().with_max_records(2);
        let (engine, _source) = engine_with(config, Arc::new(MemoryStore::new())).await;

        for id in ["1", "2", "3"] {
            engine
                .handle_event(start(id, &format!("https://api.example.com/{id}"), "GET"))
                .await;
        }

        let ids: Vec<String> = engine
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
        assert_eq!(
            engine.handle_event(headers("1", None)).await,
            EventOutcome::Unmatched
        );
    }

    #[tokio::test]
    async fn test_request_body_decoding() {
        let (engine, _source) = engine().await;
        engine
            .handle_event(LifecycleEvent::RequestStart(RequestStartDetails {
                request_id: "1".to_string(),
                url: "https://api.example.com/upload".to_string(),
                method: "POST".to_string(),
                time_stamp: 0.0,
                request_body: Some(RequestBodyDetails {
                    raw: Some(vec![UploadChunk {
                        bytes: Some(vec![0xc3, 0x28]),
                        file: None,
                    }]),
                    form_data: None,
                }),
            }))
            .await;

        assert_eq!(
            engine.snapshot().await[0].request_body,
            Some(RequestBody::Binary)
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_copy() {
        let (engine, _source) = engine().await;
        engine.handle_event(start("1", "https://api.example.com/a", "GET")).await;

        let before = engine.snapshot().await;
        engine.handle_event(completed("1", 200, None)).await;

        assert_eq!(before[0].status_code, None);
        assert_eq!(engine.snapshot().await[0].status_code, Some(200));
    }

    #[tokio::test]
    async fn test_clear_then_snapshot_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _source) = engine_with(CaptureConfig::default(), store.clone()).await;
        engine.handle_event(start("1", "https://api.example.com/a", "GET")).await;
        engine.handle_event(start("2", "https://api.example.com/b", "GET")).await;

        assert!(engine.clear_all().await.is_empty());
        assert!(engine.snapshot().await.is_empty());

        let persisted: Vec<CallRecord> = load_json(store.as_ref(), API_CALLS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_races_with_late_events() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _source) = engine_with(CaptureConfig::default(), store.clone()).await;
        for i in 0..50 {
            engine
                .handle_event(start(&i.to_string(), "https://api.example.com/x", "GET"))
                .await;
        }

        let mut tasks = Vec::new();
        for i in 0..50 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.handle_event(headers(&i.to_string(), None)).await;
                engine.handle_event(completed(&i.to_string(), 200, None)).await;
            }));
        }
        let cleared = engine.clear_all().await;
        for task in tasks {
            task.await.unwrap();
        }

        assert!(cleared.is_empty());
        assert!(engine.snapshot().await.is_empty());
        let persisted: Vec<CallRecord> = load_json(store.as_ref(), API_CALLS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_engine_ignores_direct_events() {
        let (engine, _source) = engine().await;
        engine.stop_capture().await;

        assert_eq!(
            engine
                .handle_event(start("1", "https://api.example.com/a", "GET"))
                .await,
            EventOutcome::Inactive
        );
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let (engine, source) = engine().await;
        let mut calls = engine.subscribe_calls();
        assert!(engine.is_attached().await);
        assert_eq!(source.subscriber_count(), 1);

        source.emit(start("1", "https://api.example.com/users", "GET"));
        let record = next_call(&mut calls).await;
        assert_eq!(record.request_id, "1");
        assert_eq!(engine.len().await, 1);
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                out.push(tail);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_late_events_in_any_order_through_subscription() {
        // 0, 1: headers (first, duplicate); 2, 3: completion (first, duplicate)
        let orders = permutations(&[0, 1, 2, 3]);
        assert_eq!(orders.len(), 24);
        let ids = ["a", "b", "c"];

        for round in 0..orders.len() {
            let (engine, source) = engine().await;
            let mut calls = engine.subscribe_calls();

            for id in ids {
                source.emit(LifecycleEvent::RequestStart(RequestStartDetails {
                    request_id: id.to_string(),
                    url: format!("https://api.example.com/{id}"),
                    method: "PATCH".to_string(),
                    time_stamp: 1_700_000_000_000.0,
                    request_body: Some(RequestBodyDetails {
                        raw: Some(vec![UploadChunk {
                            bytes: Some(id.as_bytes().to_vec()),
                            file: None,
                        }]),
                        form_data: None,
                    }),
                }));
            }

            let late = |id: &str, kind: usize| match kind {
                0 => headers(id, Some(vec![HttpHeader::new("X-Seq", "first")])),
                1 => headers(id, Some(vec![HttpHeader::new("X-Seq", "second")])),
                2 => completed(id, 200, Some(vec![HttpHeader::new("X-Seq", "first")])),
                _ => completed(id, 500, Some(vec![HttpHeader::new("X-Seq", "second")])),
            };
            for step in 0..4 {
                for (k, id) in ids.iter().enumerate() {
                    let order = &orders[(round + k) % orders.len()];
                    source.emit(late(*id, order[step]));
                }
            }

            // The pump handles events in order, so this one lands last
            source.emit(start("done", "https://api.example.com/done", "GET"));
            loop {
                if next_call(&mut calls).await.request_id == "done" {
                    break;
                }
            }

            let snapshot = engine.snapshot().await;
            assert_eq!(snapshot.len(), ids.len() + 1);

            for (k, id) in ids.iter().enumerate() {
                let order = &orders[(round + k) % orders.len()];
                let first_headers = order.iter().copied().find(|&e| e < 2).unwrap();
                let first_completion = order.iter().copied().find(|&e| e >= 2).unwrap();

                let record = snapshot.iter().find(|r| r.request_id == *id).unwrap();
                assert_eq!(record.url, format!("https://api.example.com/{id}"));
                assert_eq!(record.method, "PATCH");
                assert_eq!(record.timestamp, format_timestamp(1_700_000_000_000.0));
                assert_eq!(record.request_body, Some(RequestBody::Text(id.to_string())));

                let expected_headers = if first_headers == 0 { "first" } else { "second" };
                assert_eq!(
                    record.request_headers,
                    Some(vec![HttpHeader::new("X-Seq", expected_headers)]),
                    "round {round}, id {id}, order {order:?}"
                );

                let (status, value) = if first_completion == 2 {
                    (200, "first")
                } else {
                    (500, "second")
                };
                assert_eq!(record.status_code, Some(status));
                assert_eq!(
                    record.response_headers,
                    Some(vec![HttpHeader::new("X-Seq", value)]),
                    "round {round}, id {id}, order {order:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_stop_detaches_from_source() {
        let (engine, source) = engine().await;

        let state = engine.stop_capture().await;
        assert!(!state.enabled);
        assert!(!engine.is_attached().await);
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(source.emit(start("1", "https://api.example.com/a", "GET")), 0);

        // Stopping twice is a no-op
        assert!(!engine.stop_capture().await.enabled);
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_start_keeps_single_subscription() {
        let (engine, source) = engine().await;
        let mut calls = engine.subscribe_calls();

        engine.stop_capture().await;
        assert!(engine.start_capture().await.enabled);
        assert!(engine.start_capture().await.enabled);
        assert_eq!(source.subscriber_count(), 1);

        source.emit(start("1", "https://api.example.com/a", "GET"));
        source.emit(start("2", "https://api.example.com/b", "GET"));
        assert_eq!(next_call(&mut calls).await.request_id, "1");
        assert_eq!(next_call(&mut calls).await.request_id, "2");

        let ids: Vec<String> = engine
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capture_state_persists_across_restart() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let (engine, _source) = engine_with(CaptureConfig::default(), store.clone()).await;
        assert!(engine.capture_state().await.enabled);
        engine.stop_capture().await;

        let (restarted, source) = engine_with(CaptureConfig::default(), store).await;
        assert!(!restarted.capture_state().await.enabled);
        assert!(!restarted.is_attached().await);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_log_round_trips_through_sled() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::new(temp_dir.path().to_path_buf()).unwrap());

        let original = {
            let (engine, _source) = engine_with(CaptureConfig::default(), store.clone()).await;
            engine.handle_event(start("1", "https://api.example.com/a", "GET")).await;
            engine
                .handle_event(headers("1", Some(vec![HttpHeader::new("X-Trace", "abc")])))
                .await;
            engine.handle_event(start("2", "https://api.example.com/b", "DELETE")).await;
            engine.handle_event(completed("2", 204, None)).await;
            let snapshot = engine.snapshot().await;
            engine.stop_capture().await;
            snapshot
        };

        let (restored, _source) = engine_with(CaptureConfig::default(), store).await;
        assert_eq!(restored.snapshot().await, original);
    }

    #[tokio::test]
    async fn test_restored_log_is_truncated_to_cap() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let (engine, _source) = engine_with(CaptureConfig::default(), store.clone()).await;
        for id in ["1", "2", "3"] {
            engine.handle_event(start(id, "https://api.example.com/", "GET")).await;
        }

        let config = CaptureConfig::default().with_max_records(1);
        let (restored, _source) = engine_with(config, store).await;
        let snapshot = restored.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].request_id, "3");
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let (engine, _source) = engine_with(CaptureConfig::default(), Arc::new(FailingStore)).await;

        engine.handle_event(start("1", "https://api.example.com/a", "GET")).await;
        engine.handle_event(completed("1", 200, None)).await;
        assert_eq!(engine.snapshot().await[0].status_code, Some(200));

        assert!(!engine.stop_capture().await.enabled);
        assert!(engine.start_capture().await.enabled);
        assert!(engine.clear_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_persisted_state_falls_back_to_defaults() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(API_CALLS_KEY, serde_json::json!({"not": "a list"}))
            .await
            .unwrap();
        store
            .set(CAPTURE_ENABLED_KEY, serde_json::json!("maybe"))
            .await
            .unwrap();

        let (engine, _source) = engine_with(CaptureConfig::default(), store).await;
        assert!(engine.is_empty().await);
        assert!(engine.capture_state().await.enabled);
    }
}
