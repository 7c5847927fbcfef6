use std::env;
use std::path::{Path, PathBuf};

use bandsync_core::db::Database;
use bandsync_core::models::{QueuedOperation, StoredConflict};
use bandsync_core::sync::HttpSyncTransport;
use bandsync_core::util::normalize_text_option;
use bandsync_core::{ClientConfig, SyncClient};
use serde::Serialize;

use crate::error::CliError;

pub const API_URL_ENV: &str = "BANDSYNC_API_URL";
pub const TOKEN_ENV: &str = "BANDSYNC_TOKEN";

/// Paths resolved from flags, env and platform defaults
pub struct CliPaths {
    pub config: PathBuf,
    pub db: PathBuf,
}

impl CliPaths {
    pub fn resolve(config: Option<PathBuf>, db: Option<PathBuf>) -> Result<Self, CliError> {
        let config = match config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let db = match db {
            Some(path) => path,
            None => default_db_path()?,
        };
        Ok(Self { config, db })
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("bandsync").join("config.json"))
        .ok_or_else(|| CliError::Config("could not resolve a config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("bandsync").join("bandsync.db"))
        .ok_or_else(|| CliError::Config("could not resolve a data directory".to_string()))
}

/// Load the config file and layer env overrides on top
pub fn load_config(path: &Path) -> Result<ClientConfig, CliError> {
    if !path.exists() {
        return Err(CliError::NotConfigured(path.to_path_buf()));
    }
    let config = ClientConfig::load(path)?;
    let config = apply_env_overrides(
        config,
        env::var(API_URL_ENV).ok(),
        env::var(TOKEN_ENV).ok(),
    );
    Ok(config.validate()?)
}

pub fn apply_env_overrides(
    mut config: ClientConfig,
    api_url: Option<String>,
    token: Option<String>,
) -> ClientConfig {
    if let Some(api_url) = normalize_text_option(api_url) {
        config.api_base_url = api_url;
    }
    if let Some(token) = normalize_text_option(token) {
        config.auth_token = Some(token);
    }
    config
}

pub fn open_client(paths: &CliPaths) -> Result<SyncClient<HttpSyncTransport>, CliError> {
    let config = load_config(&paths.config)?;
    let db = Database::open_or_recover(&paths.db)?;
    Ok(SyncClient::from_config(&config, db)?)
}

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub seq: i64,
    pub client_id: String,
    pub entity: String,
    pub operation: String,
    pub entity_id: String,
    pub base_version: Option<u64>,
    pub enqueued_at: String,
}

pub fn pending_to_item(queued: &QueuedOperation) -> PendingItem {
    let op = &queued.operation;
    PendingItem {
        seq: queued.seq,
        client_id: op.client_id.to_string(),
        entity: op.entity.to_string(),
        operation: op.operation.to_string(),
        entity_id: op.entity_id.clone(),
        base_version: op.base_version,
        enqueued_at: format_timestamp(queued.enqueued_at),
    }
}

pub fn format_pending_lines(pending: &[QueuedOperation]) -> Vec<String> {
    pending
        .iter()
        .map(|queued| {
            let op = &queued.operation;
            let base = op
                .base_version
                .map_or_else(|| "-".to_string(), |version| format!("v{version}"));
            format!(
                "{:>5}  {:<13}  {:<13}  {:<12} {:<24} {base}",
                queued.seq,
                short_id(&op.client_id.to_string()),
                op.operation,
                op.entity,
                op.entity_id
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: i64,
    pub client_id: String,
    pub entity: String,
    pub entity_id: String,
    pub kind: String,
    pub message: Option<String>,
    pub server_version: Option<u64>,
    pub recorded_at: String,
    pub resolution: Option<String>,
}

pub fn conflict_to_item(stored: &StoredConflict) -> ConflictItem {
    let conflict = &stored.conflict;
    ConflictItem {
        id: stored.id,
        client_id: conflict.client_id.to_string(),
        entity: conflict.entity.to_string(),
        entity_id: conflict.entity_id.clone(),
        kind: conflict.kind.to_string(),
        message: conflict.message.clone(),
        server_version: conflict.server_record.as_ref().map(|record| record.version),
        recorded_at: format_timestamp(stored.recorded_at),
        resolution: stored.resolution.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[StoredConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|stored| {
            let conflict = &stored.conflict;
            let state = stored.resolution.as_deref().unwrap_or("open");
            let message = conflict.message.as_deref().unwrap_or("");
            format!(
                "{:>4}  {}  {:<16}  {:<14}  {}/{}  {message}",
                stored.id,
                format_timestamp(stored.recorded_at),
                conflict.kind,
                state,
                conflict.entity,
                conflict.entity_id
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

/// One-line JSON preview, truncated to `max_chars`
pub fn json_preview(value: &serde_json::Value, max_chars: usize) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= max_chars {
        rendered
    } else {
        let mut truncated = rendered
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}
