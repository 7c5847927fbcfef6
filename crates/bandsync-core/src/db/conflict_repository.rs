//! Server-reported conflict storage

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
#![allow(clippy::cast_sign_loss)]

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{ClientId, ConflictRecord, StoredConflict};
use crate::util::unix_millis_now;

/// Storage operations for the local conflict list
pub trait ConflictRepository {
    /// Append a conflict unless an open one already exists for the same operation.
    ///
    /// Returns the local id of the stored (or already open) conflict.
    fn record(&self, tenant_id: &str, conflict: &ConflictRecord) -> Result<i64>;

    /// Unresolved conflicts for a tenant, oldest first
    fn list_open(&self, tenant_id: &str) -> Result<Vec<StoredConflict>>;

    /// Recent conflicts for a tenant, newest first, resolved or not
    fn list_recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredConflict>>;

    fn get(&self, id: i64) -> Result<Option<StoredConflict>>;

    /// Mark a conflict resolved with a reason such as `client-newer`
    fn resolve(&self, id: i64, resolution: &str) -> Result<()>;

    /// Number of unresolved conflicts for a tenant
    fn count_open(&self, tenant_id: &str) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str = "SELECT id, tenant_id, body, recorded_at, resolved_at, resolution FROM sync_conflicts";

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredConflict> {
        let body: String = row.get(2)?;
        let conflict = serde_json::from_str(&body).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(error))
        })?;
        Ok(StoredConflict {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            conflict,
            recorded_at: row.get(3)?,
            resolved_at: row.get(4)?,
            resolution: row.get(5)?,
        })
    }

    fn open_id_for(&self, client_id: &ClientId) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM sync_conflicts WHERE client_id = ?1 AND resolved_at IS NULL",
                params![client_id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(&self, tenant_id: &str, conflict: &ConflictRecord) -> Result<i64> {
        if let Some(existing) = self.open_id_for(&conflict.client_id)? {
            // Refresh the server view so reconciliation sees the latest record
            self.conn.execute(
                "UPDATE sync_conflicts SET body = ?1 WHERE id = ?2",
                params![serde_json::to_string(conflict)?, existing],
            )?;
            return Ok(existing);
        }

        self.conn.execute(
            "INSERT INTO sync_conflicts
                (tenant_id, client_id, entity_type, entity_id, kind, body, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tenant_id,
                conflict.client_id.as_str(),
                conflict.entity.as_str(),
                conflict.entity_id,
                conflict.kind.as_str(),
                serde_json::to_string(conflict)?,
                unix_millis_now()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_open(&self, tenant_id: &str) -> Result<Vec<StoredConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COLUMNS} WHERE tenant_id = ?1 AND resolved_at IS NULL ORDER BY id ASC"
        ))?;
        let conflicts = stmt
            .query_map(params![tenant_id], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    fn list_recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COLUMNS} WHERE tenant_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let conflicts = stmt
            .query_map(params![tenant_id, limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    fn get(&self, id: i64) -> Result<Option<StoredConflict>> {
        Ok(self
            .conn
            .query_row(
                &format!("{COLUMNS} WHERE id = ?1"),
                params![id],
                Self::parse_conflict,
            )
            .optional()?)
    }

    fn resolve(&self, id: i64, resolution: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolved_at = ?1, resolution = ?2
             WHERE id = ?3 AND resolved_at IS NULL",
            params![unix_millis_now(), resolution, id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("open conflict {id}")));
        }
        Ok(())
    }

    fn count_open(&self, tenant_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE tenant_id = ?1 AND resolved_at IS NULL",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
