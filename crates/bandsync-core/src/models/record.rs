//! Versioned record and pull change-log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-versioned entity state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord {
    pub id: String,
    /// Monotonic, advanced once per accepted mutation
    pub version: u64,
    /// RFC 3339 timestamp as sent on the wire; may be malformed
    pub updated_at: String,
    pub data: serde_json::Value,
}

impl VersionedRecord {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        version: u64,
        updated_at: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            updated_at: updated_at.into(),
            data,
        }
    }

    /// Parsed `updated_at`, or `None` when the string is not RFC 3339
    pub fn updated_at_parsed(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.updated_at.trim())
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }
}

/// What a change-log entry did to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// One server-authoritative mutation returned by PULL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub version: u64,
}

/// Entity as held in the local cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub version: u64,
    pub data: serde_json::Value,
    /// Whether this row is an optimistic local write not yet confirmed by PULL
    pub is_local: bool,
    pub is_deleted: bool,
    /// Last local write (Unix ms)
    pub updated_at: i64,
}
