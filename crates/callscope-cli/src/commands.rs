//! Subcommand implementations

use callscope_core::presenter::format_call_line;
use callscope_core::{
    export_collection, AppError, CallFilter, CallRecord, Command, CommandResponse, Result,
};
use std::path::Path;

use crate::Context;

/// Current log narrowed by `filter`, with folder tags stamped
async fn filtered(ctx: &Context, filter: &CallFilter) -> Result<Vec<CallRecord>> {
    let snapshot = ctx.engine.snapshot().await;
    let mut records = match filter.folder.as_deref() {
        Some(folder) => ctx.folders.records_in(folder, &snapshot)?,
        None => snapshot,
    };
    ctx.folders.annotate(&mut records);
    Ok(filter.apply(&records, Some(&ctx.folders)))
}

pub async fn list(ctx: &Context, filter: &CallFilter, json: bool) -> Result<()> {
    let records = filtered(ctx, filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No captured calls");
        return Ok(());
    }
    for record in &records {
        println!("{}  {}", record.request_id, format_call_line(record));
    }
    Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
    let state = ctx.engine.capture_state().await;
    let snapshot = ctx.engine.snapshot().await;
    let pending = snapshot.iter().filter(|r| !r.is_complete()).count();

    println!(
        "Capture: {}",
        if state.enabled { "enabled" } else { "disabled" }
    );
    println!("Calls: {} ({} pending)", snapshot.len(), pending);
    println!("Folders: {}", ctx.folders.folder_names().len());

    if let Some(db) = &ctx.db {
        let stats = db.get_stats()?;
        println!("Store: {} keys, {} bytes", stats.key_count, stats.size_bytes);
    }
    Ok(())
}

pub async fn start(ctx: &Context) -> Result<()> {
    print_response(ctx.engine.execute(Command::StartCapture).await)
}

pub async fn stop(ctx: &Context) -> Result<()> {
    print_response(ctx.engine.execute(Command::StopCapture).await)
}

pub async fn clear(ctx: &Context) -> Result<()> {
    let before = ctx.engine.len().await;
    ctx.engine.execute(Command::ClearApiCalls).await;
    println!("Cleared {before} calls");
    Ok(())
}

pub async fn folder_create(ctx: &mut Context, name: &str) -> Result<()> {
    if ctx.folders.create_folder(name).await? {
        println!("Created folder '{name}'");
    } else {
        println!("Folder '{name}' already exists");
    }
    Ok(())
}

pub async fn folder_clear(ctx: &mut Context) -> Result<()> {
    let removed = ctx.folders.clear().await?;
    println!("Removed {removed} folders");
    Ok(())
}

pub async fn folder_assign(ctx: &mut Context, request_id: &str, name: &str) -> Result<()> {
    if !ctx.folders.contains(name) {
        return Err(AppError::NotFound(format!("folder '{name}'")));
    }

    let known = ctx
        .engine
        .snapshot()
        .await
        .iter()
        .any(|r| r.request_id == request_id);
    if !known {
        tracing::warn!("Call {} is not in the current log", request_id);
    }

    if ctx.folders.assign(request_id, name).await? {
        println!("Moved {request_id} to '{name}'");
    } else {
        println!("{request_id} is already in '{name}'");
    }
    Ok(())
}

pub fn folder_list(ctx: &Context) -> Result<()> {
    for name in ctx.folders.folder_names() {
        let size = ctx.folders.members(&name).map(|m| m.len()).unwrap_or(0);
        println!("{name} ({size})");
    }
    Ok(())
}

pub async fn export(
    ctx: &Context,
    name: &str,
    filter: &CallFilter,
    output: Option<&Path>,
) -> Result<()> {
    let records = filtered(ctx, filter).await?;

    let json = export_collection(&records, name).to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("Exported {} calls to {}", records.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_response(response: CommandResponse) -> Result<()> {
    match response {
        CommandResponse::State(state) => println!(
            "Capture {}",
            if state.enabled { "enabled" } else { "disabled" }
        ),
        CommandResponse::Calls(calls) => println!("{} calls", calls.len()),
    }
    Ok(())
}
