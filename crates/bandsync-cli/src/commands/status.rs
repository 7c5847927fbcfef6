use serde::Serialize;

use crate::commands::common::{open_client, CliPaths};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub tenant_id: String,
    pub device_id: String,
    pub pending: usize,
    pub open_conflicts: usize,
    pub quarantined: usize,
    pub cursor: Option<String>,
    pub database: String,
}

pub async fn run_status(as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let status = StatusItem {
        tenant_id: client.context().tenant_id().to_string(),
        device_id: client.context().device_id().to_string(),
        pending: client.pending_count().await?,
        open_conflicts: client.conflict_count().await?,
        quarantined: client.quarantined_count().await?,
        cursor: client.cursor().await?,
        database: paths.db.display().to_string(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Tenant:      {}", status.tenant_id);
    println!("Device:      {}", status.device_id);
    println!("Pending:     {}", status.pending);
    println!("Conflicts:   {}", status.open_conflicts);
    if status.quarantined > 0 {
        println!("Quarantined: {}", status.quarantined);
    }
    println!(
        "Cursor:      {}",
        status.cursor.as_deref().unwrap_or("(never pulled)")
    );
    println!("Database:    {}", status.database);
    Ok(())
}
