//! bandsync CLI - operator front-end for the offline-first sync client
//!
//! Queue mutations, run sync cycles and inspect the local store from the
//! terminal.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::CliPaths;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_reconcile, run_resolve};
use crate::commands::detect::run_detect;
use crate::commands::enqueue::run_enqueue;
use crate::commands::pending::run_pending;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "bandsync=info".parse::<tracing_subscriber::filter::Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = CliPaths::resolve(cli.config, cli.db_path)?;

    match cli.command {
        Commands::Enqueue(args) => run_enqueue(args, &paths).await?,
        Commands::Sync { json } => run_sync(json, &paths).await?,
        Commands::Status { json } => run_status(json, &paths).await?,
        Commands::Pending { limit, json } => run_pending(limit, json, &paths).await?,
        Commands::Conflicts { limit, json } => run_conflicts(limit, json, &paths).await?,
        Commands::Reconcile { strategy } => run_reconcile(strategy, &paths).await?,
        Commands::Resolve { id, keep_local, .. } => run_resolve(id, keep_local, &paths).await?,
        Commands::Cache { entity_type, json } => run_cache(&entity_type, json, &paths).await?,
        Commands::Detect { snapshot, json } => run_detect(&snapshot, json)?,
        Commands::Config { command } => run_config(command, &paths)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
