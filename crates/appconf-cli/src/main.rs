//! appconf CLI
//!
//! Command-line interface for the local configuration store

use appconf_core::logging_facility::{init, Profile};
use appconf_core_types::RequestContext;
use appconf_store::AppConfOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Instrument;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "appconf")]
#[command(about = "appconf - Key-value configuration store with point-in-time snapshots", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Caller-supplied id attached to every log line of this invocation
    #[arg(long, global = true)]
    client_request_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Key-value operations
    Kv(commands::kv::KvArgs),
    /// Snapshot operations
    Snapshot(commands::snapshot::SnapshotArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init(if cli.json_logs {
        Profile::Production
    } else {
        Profile::Development
    });

    let mut ctx = RequestContext::new();
    if let Some(id) = &cli.client_request_id {
        ctx = ctx.with_client_request_id(id.as_str());
    }
    let span = tracing::info_span!(
        "request",
        request_id = %ctx.request_id,
        client_request_id = ctx.client_request_id.as_deref().unwrap_or_default()
    );

    if let Err(e) = run(cli).instrument(span).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> commands::CliResult {
    let options = match &cli.config {
        Some(path) => AppConfOptions::load(path)?,
        None => AppConfOptions::default(),
    };
    options.validate()?;

    match cli.command {
        Commands::Kv(args) => commands::kv::execute(args, &options).await,
        Commands::Snapshot(args) => commands::snapshot::execute(args, &options).await,
    }
}
