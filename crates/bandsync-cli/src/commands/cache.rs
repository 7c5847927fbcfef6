use bandsync_core::models::{CachedEntity, EntityKind};
use serde::Serialize;

use crate::commands::common::{format_timestamp, json_preview, open_client, CliPaths};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct CachedItem {
    pub entity_id: String,
    pub version: u64,
    pub pending_local: bool,
    pub updated_at: String,
    pub data: serde_json::Value,
}

pub async fn run_cache(entity_type: &str, as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let kind = entity_type.parse::<EntityKind>()?;
    let client = open_client(paths)?;
    let entities = client.list_cached(kind).await?;

    if as_json {
        let json_items = entities.iter().map(cached_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entities.is_empty() {
        println!("No cached {kind} entries.");
        return Ok(());
    }

    for line in format_cached_lines(&entities) {
        println!("{line}");
    }
    Ok(())
}

pub fn cached_to_item(entity: &CachedEntity) -> CachedItem {
    CachedItem {
        entity_id: entity.entity_id.clone(),
        version: entity.version,
        pending_local: entity.is_local,
        updated_at: format_timestamp(entity.updated_at),
        data: entity.data.clone(),
    }
}

pub fn format_cached_lines(entities: &[CachedEntity]) -> Vec<String> {
    entities
        .iter()
        .map(|entity| {
            let marker = if entity.is_local { "*" } else { " " };
            format!(
                "{marker} {:<24}  v{:<4}  {}",
                entity.entity_id,
                entity.version,
                json_preview(&entity.data, 60)
            )
        })
        .collect()
}
