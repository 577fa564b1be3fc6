//! Presenter Trait
//!
//! This module provides the Presenter trait for decoupling new-call
//! display from any particular frontend. Implementations can render to
//! stdout (CLI), a UI, or nothing at all (tests).

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::events::NewCallEvent;
use crate::record::CallRecord;

/// Receiver of new-call notifications
#[async_trait]
pub trait Presenter: Send + Sync {
    /// A record was just captured
    async fn on_new_call(&self, record: &CallRecord) -> Result<(), String>;
}

/// Forward notifications from `rx` to `presenter` until the channel closes.
///
/// Lagging is logged and skipped; presenter errors are logged and do not
/// stop the forwarding loop.
pub fn spawn_presenter<P>(mut rx: broadcast::Receiver<NewCallEvent>, presenter: P) -> JoinHandle<()>
where
    P: Presenter + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = presenter.on_new_call(&event.new_record).await {
                        tracing::warn!("Presenter failed to handle new call: {}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Presenter lagged, skipped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// No-op presenter for testing or headless runs
#[derive(Default, Clone)]
pub struct NoOpPresenter;

#[async_trait]
impl Presenter for NoOpPresenter {
    async fn on_new_call(&self, _record: &CallRecord) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout presenter for CLI mode - prints calls to console
#[derive(Default, Clone)]
pub struct StdoutPresenter {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutPresenter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// Render a record as one output line
    pub fn render(&self, record: &CallRecord) -> String {
        if self.json_output {
            serde_json::to_string(record).unwrap_or_default()
        } else {
            format_call_line(record)
        }
    }
}

#[async_trait]
impl Presenter for StdoutPresenter {
    async fn on_new_call(&self, record: &CallRecord) -> Result<(), String> {
        println!("{}", self.render(record));
        Ok(())
    }
}

/// `[timestamp] METHOD url (status)` with `-` for a pending status
pub fn format_call_line(record: &CallRecord) -> String {
    let status = record
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let moved = record
        .moved_to
        .as_deref()
        .map(|f| format!(" [{f}]"))
        .unwrap_or_default();

    format!(
        "[{}] {} {} ({}){}",
        record.timestamp, record.method, record.url, status, moved
    )
}
