//! Lifecycle event replay
//!
//! Reads a JSON-lines file of lifecycle events and feeds each one into
//! the engine in file order, printing new calls as they are recorded.

use callscope_core::presenter::{spawn_presenter, StdoutPresenter};
use callscope_core::{AppError, EventOutcome, LifecycleEvent, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::Context;

/// Counts of what each replayed line did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub recorded: usize,
    pub updated: usize,
    pub skipped: usize,
    pub invalid: usize,
}

impl ReplaySummary {
    fn add(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Recorded => self.recorded += 1,
            EventOutcome::Updated => self.updated += 1,
            EventOutcome::Excluded
            | EventOutcome::Unmatched
            | EventOutcome::Duplicate
            | EventOutcome::Inactive => self.skipped += 1,
        }
    }
}

pub async fn run_replay(ctx: Context, file: &Path, json_output: bool) -> Result<()> {
    if !ctx.engine.capture_state().await.enabled {
        tracing::warn!("Capture is disabled; replayed events will be ignored");
    }

    let presenter = spawn_presenter(
        ctx.engine.subscribe_calls(),
        StdoutPresenter::new(json_output),
    );

    let summary = replay_file(&ctx, file).await?;

    // Closing the notification channel lets the presenter drain and exit
    drop(ctx);
    if let Err(e) = presenter.await {
        tracing::warn!("Presenter task failed: {}", e);
    }

    tracing::info!(
        "Replay finished: {} recorded, {} updated, {} skipped, {} invalid",
        summary.recorded,
        summary.updated,
        summary.skipped,
        summary.invalid
    );
    Ok(())
}

pub async fn replay_file(ctx: &Context, file: &Path) -> Result<ReplaySummary> {
    let handle = File::open(file).await.map_err(|e| {
        AppError::IoError(format!("Failed to open {}: {e}", file.display()))
    })?;
    let mut lines = BufReader::new(handle).lines();
    let mut summary = ReplaySummary::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<LifecycleEvent>(line) {
            Ok(event) => summary.add(ctx.engine.handle_event(event).await),
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", line_no, e);
                summary.invalid += 1;
            }
        }
    }

    Ok(summary)
}
