//! Sync conflict models

use serde::{Deserialize, Serialize};
use std::fmt;

use super::operation::{ClientId, EntityKind};
use super::record::VersionedRecord;

/// Why the server refused an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// `baseVersion` did not match the current server version
    VersionMismatch,
    /// A server-side business rule refused the mutation
    BusinessRule,
}

impl ConflictKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version-mismatch",
            Self::BusinessRule => "business-rule",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-reported disagreement between a pushed operation and server state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub client_id: ClientId,
    pub entity: EntityKind,
    pub entity_id: String,
    pub kind: ConflictKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Current server state of the entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_record: Option<VersionedRecord>,
    /// Client state as the server understood the submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_record: Option<VersionedRecord>,
}

/// A conflict held in the local conflict table until resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredConflict {
    /// Local sequence id
    pub id: i64,
    pub tenant_id: String,
    pub conflict: ConflictRecord,
    /// When the conflict was recorded (Unix ms)
    pub recorded_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    /// Resolution reason, e.g. `client-newer`
    pub resolution: Option<String>,
}

impl StoredConflict {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
