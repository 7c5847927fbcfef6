use bandsync_core::reconcile::ResolutionStrategy;

use crate::cli::StrategyArg;
use crate::commands::common::{
    conflict_to_item, format_conflict_lines, open_client, CliPaths, ConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(limit: usize, as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let conflicts = client.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_reconcile(strategy: StrategyArg, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let summary = client.reconcile_conflicts(strategy.into()).await?;

    println!(
        "Kept local: {}  Kept server: {}  Needs manual: {}",
        summary.client_won, summary.server_won, summary.needs_manual
    );
    if summary.needs_manual > 0 {
        println!("Use `bandsync resolve <id> --keep-local|--keep-server` for the rest.");
    }
    Ok(())
}

pub async fn run_resolve(id: i64, keep_local: bool, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    client.resolve_conflict_manually(id, keep_local).await?;

    if keep_local {
        println!("Conflict {id} resolved; local change will be pushed on next sync.");
    } else {
        println!("Conflict {id} resolved; local change dropped.");
    }
    Ok(())
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Lww => Self::LastWriteWins,
            StrategyArg::Manual => Self::Manual,
        }
    }
}
