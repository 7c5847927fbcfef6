use crate::commands::common::{
    format_pending_lines, open_client, pending_to_item, CliPaths, PendingItem,
};
use crate::error::CliError;

pub async fn run_pending(limit: usize, as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let client = open_client(paths)?;
    let pending = client.pending(limit).await?;

    if as_json {
        let json_items = pending
            .iter()
            .map(pending_to_item)
            .collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_pending_lines(&pending) {
        println!("{line}");
    }
    Ok(())
}
