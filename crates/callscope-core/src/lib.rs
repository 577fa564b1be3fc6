//! Callscope Core Library
//!
//! Capture, correlation and persistence of HTTP calls observed in a
//! browser context. This crate is independent of any frontend; presenters
//! attach through the command protocol and the new-call channel.
//!
//! # Modules
//!
//! - [`engine`] - Capture engine: subscription lifecycle and event correlation
//! - [`record`] - Captured call records and body decoding
//! - [`source`] - Request lifecycle events and event sources
//! - [`storage`] - Persistent key-value store (sled, in-memory)
//! - [`events`] - New-call notification channel
//! - [`presenter`] - Presenter trait for rendering new calls
//! - [`commands`] - Command protocol
//! - [`folders`] - Named groups of captured calls
//! - [`query`] - Record filtering
//! - [`export`] - Postman collection export
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod folders;
pub mod presenter;
pub mod query;
pub mod record;
pub mod source;
pub mod storage;

// Re-export commonly used types
pub use commands::{Command, CommandResponse};
pub use config::{CaptureConfig, ExclusionPolicy};
pub use engine::{CaptureEngine, CaptureState, EventOutcome};
pub use error::{AppError, Result};
pub use events::{CallNotifier, NewCallEvent};
pub use export::{export_collection, Collection};
pub use folders::FolderIndex;
pub use presenter::{spawn_presenter, NoOpPresenter, Presenter, StdoutPresenter};
pub use query::CallFilter;
pub use record::{CallRecord, HttpHeader, RequestBody};
pub use source::{ChannelEventSource, EventSource, LifecycleEvent};
pub use storage::{MemoryStore, PersistentStore, SledStore};
