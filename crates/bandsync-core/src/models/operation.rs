//! Queued client operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Idempotency key for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Create a new unique client id using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Syncable entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Booking,
    Member,
    Availability,
    Setlist,
    Song,
    Venue,
    Task,
}

impl EntityKind {
    pub const ALL: [Self; 8] = [
        Self::Event,
        Self::Booking,
        Self::Member,
        Self::Availability,
        Self::Setlist,
        Self::Song,
        Self::Venue,
        Self::Task,
    ];

    /// Wire / cache-key name of this entity kind
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Booking => "booking",
            Self::Member => "member",
            Self::Availability => "availability",
            Self::Setlist => "setlist",
            Self::Song => "song",
            Self::Venue => "venue",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity kind '{s}'")))
    }
}

/// Mutation kind carried by a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    ReorderBatch,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::ReorderBatch => "reorder-batch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "reorder-batch" | "reorder_batch" | "reorder" => Ok(Self::ReorderBatch),
            other => Err(Error::InvalidInput(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// One step of a `reorder-batch` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOperation {
    /// Idempotency key of this step
    pub client_op_id: ClientId,
    /// Entity touched by this step
    pub entity_id: String,
    /// New position within the parent collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl SubOperation {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, position: u32) -> Self {
        Self {
            client_op_id: ClientId::new(),
            entity_id: entity_id.into(),
            position: Some(position),
            payload: None,
        }
    }
}

/// A local mutation waiting for server acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOperation {
    /// Idempotency key, unique for the life of the queue entry
    pub client_id: ClientId,
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub entity_id: String,
    /// Tenant (band) this operation belongs to
    pub tenant_scope_id: String,
    /// Server version the mutation was based on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_operations: Option<Vec<SubOperation>>,
    /// RFC 3339 timestamp of the local mutation
    pub updated_at: String,
}

impl ClientOperation {
    /// Build a new operation with a fresh `client_id` and the current time
    #[must_use]
    pub fn new(
        entity: EntityKind,
        operation: OperationKind,
        entity_id: impl Into<String>,
        tenant_scope_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: ClientId::new(),
            entity,
            operation,
            entity_id: entity_id.into(),
            tenant_scope_id: tenant_scope_id.into(),
            base_version: None,
            payload: None,
            sub_operations: None,
            updated_at: crate::util::rfc3339_now(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub const fn with_base_version(mut self, version: u64) -> Self {
        self.base_version = Some(version);
        self
    }

    #[must_use]
    pub fn with_sub_operations(mut self, steps: Vec<SubOperation>) -> Self {
        self.sub_operations = Some(steps);
        self
    }

    /// Check the shape rules every queued operation must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.tenant_scope_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "operation must be scoped to a tenant".into(),
            ));
        }
        if self.entity_id.trim().is_empty() {
            return Err(Error::InvalidInput("operation entity id is empty".into()));
        }

        match self.operation {
            OperationKind::Create | OperationKind::Update => {
                if !self.payload.as_ref().is_some_and(serde_json::Value::is_object) {
                    return Err(Error::InvalidInput(format!(
                        "{} operation requires an object payload",
                        self.operation
                    )));
                }
            }
            OperationKind::Delete => {}
            OperationKind::ReorderBatch => {
                let steps = self.sub_operations.as_deref().unwrap_or_default();
                if steps.is_empty() {
                    return Err(Error::InvalidInput(
                        "reorder-batch requires at least one sub-operation".into(),
                    ));
                }
                if steps.iter().any(|step| step.entity_id.trim().is_empty()) {
                    return Err(Error::InvalidInput(
                        "reorder-batch sub-operation entity id is empty".into(),
                    ));
                }
            }
        }

        if self.operation != OperationKind::ReorderBatch && self.sub_operations.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} operation cannot carry sub-operations",
                self.operation
            )));
        }

        Ok(())
    }
}

/// An operation as stored in the local log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedOperation {
    /// Local, monotonically increasing sequence id
    pub seq: i64,
    pub operation: ClientOperation,
    /// When the entry was appended (Unix ms)
    pub enqueued_at: i64,
}
