//! Command protocol
//!
//! Presenters talk to the engine through these messages. The JSON shape
//! is `{"action": "<name>"}` for requests; responses are either a list of
//! records or a capture state object.

use serde::{Deserialize, Serialize};

use crate::engine::{CaptureEngine, CaptureState};
use crate::record::CallRecord;

/// A request from a presenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    GetApiCalls,
    GetCaptureState,
    StartCapture,
    StopCapture,
    ClearApiCalls,
}

/// The engine's answer to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Calls(Vec<CallRecord>),
    State(CaptureState),
}

impl CaptureEngine {
    /// Run a command against this engine
    pub async fn execute(&self, command: Command) -> CommandResponse {
        tracing::debug!("Executing command {:?}", command);
        match command {
            Command::GetApiCalls => CommandResponse::Calls(self.snapshot().await),
            Command::GetCaptureState => CommandResponse::State(self.capture_state().await),
            Command::StartCapture => CommandResponse::State(self.start_capture().await),
            Command::StopCapture => CommandResponse::State(self.stop_capture().await),
            Command::ClearApiCalls => CommandResponse::Calls(self.clear_all().await),
        }
    }
}
