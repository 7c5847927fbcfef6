//! Durable client operation log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
#![allow(clippy::cast_sign_loss)] // COUNT(*) is never negative

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{ClientId, ClientOperation, QueuedOperation};
use crate::util::unix_millis_now;

/// Storage operations for the pending operation queue
pub trait OperationLogRepository {
    /// Append an operation; returns its local sequence id
    fn enqueue(&self, op: &ClientOperation) -> Result<i64>;

    /// Pending operations, oldest first
    fn list_pending(&self, limit: usize) -> Result<Vec<QueuedOperation>>;

    /// Pending operations for one tenant, oldest first
    fn list_pending_for_tenant(&self, tenant_id: &str, limit: usize)
        -> Result<Vec<QueuedOperation>>;

    /// Pending operations for one tenant after `after_seq` that may be pushed now.
    ///
    /// An operation parked behind an open conflict is held back, and so is
    /// every later operation on the same entity, so replay order per entity
    /// never changes.
    fn list_pushable(
        &self,
        tenant_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>>;

    /// Fetch one queued operation by idempotency key
    fn get(&self, client_id: &ClientId) -> Result<Option<QueuedOperation>>;

    /// Remove acknowledged operations; returns how many rows were removed
    fn acknowledge(&self, client_ids: &[ClientId]) -> Result<usize>;

    /// Replace a queued operation in place, keeping its position in the log
    fn update_operation(&self, op: &ClientOperation) -> Result<()>;

    /// Number of pending operations
    fn count(&self) -> Result<usize>;

    /// Number of pending operations for one tenant
    fn count_for_tenant(&self, tenant_id: &str) -> Result<usize>;

    /// Number of rows moved aside because they could not be decoded
    fn count_quarantined(&self) -> Result<usize>;
}

#[derive(Clone, Copy)]
enum PendingFilter<'t> {
    All,
    Tenant(&'t str),
    Pushable(&'t str),
}

struct RawRow {
    seq: i64,
    client_id: String,
    tenant_id: String,
    body: String,
    enqueued_at: i64,
}

/// `SQLite` implementation of `OperationLogRepository`
pub struct SqliteOperationLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOperationLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_raw(&self, filter: PendingFilter<'_>, after_seq: i64, limit: usize) -> Result<Vec<RawRow>> {
        const COLUMNS: &str = "SELECT seq, client_id, tenant_id, body, enqueued_at FROM operations";

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(RawRow {
                seq: row.get(0)?,
                client_id: row.get(1)?,
                tenant_id: row.get(2)?,
                body: row.get(3)?,
                enqueued_at: row.get(4)?,
            })
        };

        let rows = match filter {
            PendingFilter::All => {
                let mut stmt = self.conn.prepare(&format!(
                    "{COLUMNS} WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![after_seq, limit as i64], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            PendingFilter::Tenant(tenant_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{COLUMNS} WHERE tenant_id = ?1 AND seq > ?2 ORDER BY seq ASC LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(params![tenant_id, after_seq, limit as i64], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            PendingFilter::Pushable(tenant_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{COLUMNS}
                     WHERE tenant_id = ?1 AND seq > ?2
                       AND NOT EXISTS (
                           SELECT 1 FROM operations parked
                           JOIN sync_conflicts c ON c.client_id = parked.client_id
                           WHERE c.resolved_at IS NULL
                             AND parked.seq <= operations.seq
                             AND parked.entity_type = operations.entity_type
                             AND parked.entity_id = operations.entity_id
                       )
                     ORDER BY seq ASC LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(params![tenant_id, after_seq, limit as i64], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(rows)
    }

    /// Decode rows, quarantining any that fail, until `limit` good rows are found
    fn list_filtered(
        &self,
        filter: PendingFilter<'_>,
        mut after_seq: i64,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>> {
        let mut pending = Vec::new();

        while pending.len() < limit {
            let wanted = limit - pending.len();
            let batch = self.load_raw(filter, after_seq, wanted)?;
            let exhausted = batch.len() < wanted;

            for raw in batch {
                after_seq = raw.seq;
                match Self::decode(&raw) {
                    Ok(queued) => pending.push(queued),
                    Err(error) => self.quarantine(&raw, &error)?,
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(pending)
    }

    fn decode(raw: &RawRow) -> Result<QueuedOperation> {
        let operation: ClientOperation = serde_json::from_str(&raw.body)?;
        if operation.client_id.as_str() != raw.client_id {
            return Err(Error::InvalidInput(format!(
                "stored client id {} does not match body {}",
                raw.client_id, operation.client_id
            )));
        }
        Ok(QueuedOperation {
            seq: raw.seq,
            operation,
            enqueued_at: raw.enqueued_at,
        })
    }

    fn quarantine(&self, raw: &RawRow, error: &Error) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO quarantined_operations
                (seq, client_id, tenant_id, body, error, quarantined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                raw.seq,
                raw.client_id,
                raw.tenant_id,
                raw.body,
                error.to_string(),
                unix_millis_now()
            ],
        )?;
        tx.execute("DELETE FROM operations WHERE seq = ?1", params![raw.seq])?;
        tx.commit()?;

        tracing::warn!(
            seq = raw.seq,
            client_id = %raw.client_id,
            "Quarantined undecodable queued operation: {error}"
        );
        Ok(())
    }
}

impl OperationLogRepository for SqliteOperationLog<'_> {
    fn enqueue(&self, op: &ClientOperation) -> Result<i64> {
        op.validate()?;
        let body = serde_json::to_string(op)?;

        let inserted = self.conn.execute(
            "INSERT INTO operations (client_id, tenant_id, entity_type, entity_id, body, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                op.client_id.as_str(),
                op.tenant_scope_id,
                op.entity.as_str(),
                op.entity_id,
                body,
                unix_millis_now()
            ],
        );

        match inserted {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::InvalidInput(format!(
                    "operation {} is already queued",
                    op.client_id
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<QueuedOperation>> {
        self.list_filtered(PendingFilter::All, 0, limit)
    }

    fn list_pending_for_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>> {
        self.list_filtered(PendingFilter::Tenant(tenant_id), 0, limit)
    }

    fn list_pushable(
        &self,
        tenant_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>> {
        self.list_filtered(PendingFilter::Pushable(tenant_id), after_seq, limit)
    }

    fn get(&self, client_id: &ClientId) -> Result<Option<QueuedOperation>> {
        let raw = self
            .conn
            .query_row(
                "SELECT seq, client_id, tenant_id, body, enqueued_at FROM operations WHERE client_id = ?1",
                params![client_id.as_str()],
                |row| {
                    Ok(RawRow {
                        seq: row.get(0)?,
                        client_id: row.get(1)?,
                        tenant_id: row.get(2)?,
                        body: row.get(3)?,
                        enqueued_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match Self::decode(&raw) {
            Ok(queued) => Ok(Some(queued)),
            Err(error) => {
                self.quarantine(&raw, &error)?;
                Ok(None)
            }
        }
    }

    fn acknowledge(&self, client_ids: &[ClientId]) -> Result<usize> {
        if client_ids.is_empty() {
            return Ok(0);
        }

        // One statement, so callers may run it inside their own transaction
        let placeholders = vec!["?"; client_ids.len()].join(", ");
        let removed = self.conn.execute(
            &format!("DELETE FROM operations WHERE client_id IN ({placeholders})"),
            params_from_iter(client_ids.iter().map(ClientId::as_str)),
        )?;
        Ok(removed)
    }

    fn update_operation(&self, op: &ClientOperation) -> Result<()> {
        op.validate()?;
        let body = serde_json::to_string(op)?;
        let rows = self.conn.execute(
            "UPDATE operations SET body = ?1 WHERE client_id = ?2",
            params![body, op.client_id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queued operation {}", op.client_id)));
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_for_tenant(&self, tenant_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_quarantined(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quarantined_operations",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
