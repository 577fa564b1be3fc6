//! Callscope CLI
//!
//! Command-line presenter for the Callscope capture engine. Browses,
//! organizes and exports the calls persisted in the local store, and
//! replays recorded lifecycle events through the engine.

use callscope_core::config::{default_storage_path, CaptureConfig, ExclusionPolicy};
use callscope_core::{
    CallFilter, CaptureEngine, ChannelEventSource, FolderIndex, PersistentStore, SledStore,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod replay;

/// Callscope - inspect, organize and export captured HTTP calls
#[derive(Parser, Debug)]
#[command(name = "callscope")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path of the sled database holding captured state
    #[arg(long, env = "CALLSCOPE_DB")]
    db: Option<PathBuf>,

    /// Maximum number of calls kept (0 = unbounded)
    #[arg(long, env = "CALLSCOPE_MAX_RECORDS")]
    max_records: Option<usize>,

    /// Do not apply the built-in extension/CDN exclusions
    #[arg(long)]
    no_default_exclusions: bool,

    /// Additional URL substring to exclude (repeatable)
    #[arg(long = "exclude", value_name = "SUBSTRING")]
    exclude: Vec<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List captured calls, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show whether capture is enabled
    Status,
    /// Enable capture
    Start,
    /// Disable capture
    Stop,
    /// Delete all captured calls
    Clear,
    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Export calls as a Postman collection
    Export {
        /// Collection name
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Feed a JSON-lines file of lifecycle events through the engine
    Replay {
        /// File with one lifecycle event per line
        file: PathBuf,
        /// Print new calls as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Criteria shared by `list` and `export`
#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Case-insensitive URL substring
    #[arg(short, long)]
    search: Option<String>,
    /// HTTP method
    #[arg(short, long)]
    method: Option<String>,
    /// Response status code
    #[arg(long)]
    status: Option<u16>,
    /// Only calls in this folder
    #[arg(short, long)]
    folder: Option<String>,
    /// Hide calls that were moved into a folder
    #[arg(long)]
    hide_moved: bool,
    /// Keep only the first call per URL
    #[arg(long)]
    unique: bool,
}

impl From<FilterArgs> for CallFilter {
    fn from(args: FilterArgs) -> Self {
        CallFilter {
            search: args.search,
            method: args.method,
            status_code: args.status,
            folder: args.folder,
            hide_moved: args.hide_moved,
            unique: args.unique,
        }
    }
}

#[derive(Subcommand, Debug)]
enum FolderAction {
    /// Create an empty folder
    Create { name: String },
    /// Move a call into a folder
    Assign { request_id: String, name: String },
    /// List folders and their sizes
    List,
    /// Delete every folder
    Clear,
}

/// Everything a subcommand needs
pub struct Context {
    pub engine: CaptureEngine,
    pub folders: FolderIndex,
    /// Backing database, when the store is sled
    pub db: Option<SledStore>,
}

impl Args {
    fn capture_config(&self) -> CaptureConfig {
        let mut exclusion = if self.no_default_exclusions {
            ExclusionPolicy::none()
        } else {
            ExclusionPolicy::default()
        };
        for substring in &self.exclude {
            exclusion = exclusion.with_substring(substring.clone());
        }

        let mut config = CaptureConfig::new().with_exclusion(exclusion);
        if let Some(max_records) = self.max_records {
            config = config.with_max_records(max_records);
        }
        config
    }
}

async fn open_context(args: &Args) -> callscope_core::Result<Context> {
    let db_path = args.db.clone().unwrap_or_else(default_storage_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Opening store at {}", db_path.display());
    let db = SledStore::new(db_path)?;
    let store: Arc<dyn PersistentStore> = Arc::new(db.clone());
    let engine = CaptureEngine::new(
        args.capture_config(),
        store.clone(),
        Arc::new(ChannelEventSource::new()),
    )
    .await;
    let folders = FolderIndex::load(store).await;

    Ok(Context {
        engine,
        folders,
        db: Some(db),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let ctx = match open_context(&args).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        CliCommand::List { filter, json } => {
            commands::list(&ctx, &CallFilter::from(filter), json).await
        }
        CliCommand::Status => commands::status(&ctx).await,
        CliCommand::Start => commands::start(&ctx).await,
        CliCommand::Stop => commands::stop(&ctx).await,
        CliCommand::Clear => commands::clear(&ctx).await,
        CliCommand::Folder { action } => {
            let mut ctx = ctx;
            match action {
                FolderAction::Create { name } => commands::folder_create(&mut ctx, &name).await,
                FolderAction::Assign { request_id, name } => {
                    commands::folder_assign(&mut ctx, &request_id, &name).await
                }
                FolderAction::List => commands::folder_list(&ctx),
                FolderAction::Clear => commands::folder_clear(&mut ctx).await,
            }
        }
        CliCommand::Export {
            name,
            filter,
            output,
        } => commands::export(&ctx, &name, &CallFilter::from(filter), output.as_deref()).await,
        CliCommand::Replay { file, json } => replay::run_replay(ctx, &file, json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
