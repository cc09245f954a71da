//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::Framework;
use crate::reconcile::OnRemoteDelete;

pub mod commands;

/// Bidirectional sync between planning documents and an issue tracker
#[derive(Parser, Debug)]
#[command(name = "rsy", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Identity map path (default: .roadsync/identity.db)
    #[arg(long, global = true, env = "ROADSYNC_DB")]
    pub db: Option<PathBuf>,

    /// API token (default: ROADSYNC_TOKEN or GITHUB_TOKEN)
    #[arg(long, global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a roadsync workspace
    Init(InitArgs),

    /// Run one sync cycle
    Sync(SyncArgs),

    /// Parse documents and print the normalized graph (no remote access)
    Inspect(InspectArgs),

    /// Show identity map bindings and last cycle info
    Status,

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Repository owner (user or organization)
    #[arg(long)]
    pub owner: String,

    /// Repository name
    #[arg(long)]
    pub repo: String,

    /// Tracker API base URL (for GitHub Enterprise)
    #[arg(long)]
    pub api_base: Option<String>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Sync only documents of this framework convention
    #[arg(long, value_enum)]
    pub framework: Option<Framework>,

    /// Sync these documents instead of the configured set (repeatable)
    #[arg(long = "doc", value_name = "PATH")]
    pub docs: Vec<PathBuf>,

    /// Plan and report without mutating either side
    #[arg(long)]
    pub dry_run: bool,

    /// Policy when a mapped remote issue was deleted
    #[arg(long, value_enum)]
    pub on_remote_delete: Option<OnRemoteDelete>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Document to inspect (default: all configured documents)
    pub path: Option<PathBuf>,

    /// Framework convention for an explicit path
    #[arg(long, value_enum, requires = "path")]
    pub framework: Option<Framework>,
}
