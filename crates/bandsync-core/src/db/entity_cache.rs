//! Local entity cache, the offline read path

#![allow(clippy::cast_possible_wrap)] // SQLite stores versions as i64
#![allow(clippy::cast_sign_loss)]

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{CachedEntity, ChangeAction, ChangeEntry};
use crate::util::unix_millis_now;

const ORIGIN_LOCAL: &str = "local";
const ORIGIN_SERVER: &str = "server";

/// Result of applying one pulled change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Re-delivery of a version the cache already holds
    Stale,
}

/// Storage operations for cached entity state
pub trait EntityCacheRepository {
    /// Optimistic local write; keeps the last known server version
    fn upsert(&self, entity_type: &str, entity_id: &str, value: &serde_json::Value) -> Result<()>;

    /// Optimistic local delete (tombstone)
    fn mark_deleted(&self, entity_type: &str, entity_id: &str) -> Result<()>;

    /// Apply a server change if it is newer than what the cache holds
    fn apply_change(&self, change: &ChangeEntry) -> Result<ApplyOutcome>;

    /// Fetch one entity, including tombstones
    fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<CachedEntity>>;

    /// Live entities of a type, ordered by id
    fn list_by_type(&self, entity_type: &str) -> Result<Vec<CachedEntity>>;
}

/// `SQLite` implementation of `EntityCacheRepository`
pub struct SqliteEntityCache<'a> {
    conn: &'a Connection,
}

struct RawEntity {
    entity_type: String,
    entity_id: String,
    version: i64,
    data: String,
    origin: String,
    is_deleted: bool,
    updated_at: i64,
}

impl<'a> SqliteEntityCache<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
        Ok(RawEntity {
            entity_type: row.get(0)?,
            entity_id: row.get(1)?,
            version: row.get(2)?,
            data: row.get(3)?,
            origin: row.get(4)?,
            is_deleted: row.get::<_, i32>(5)? != 0,
            updated_at: row.get(6)?,
        })
    }

    fn decode(raw: RawEntity) -> Result<CachedEntity> {
        let data = serde_json::from_str(&raw.data)?;
        Ok(CachedEntity {
            entity_type: raw.entity_type,
            entity_id: raw.entity_id,
            version: raw.version as u64,
            data,
            is_local: raw.origin == ORIGIN_LOCAL,
            is_deleted: raw.is_deleted,
            updated_at: raw.updated_at,
        })
    }

    fn quarantine(&self, entity_type: &str, entity_id: &str, data: &str, error: &Error) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO quarantined_cache_rows (entity_type, entity_id, data, error, quarantined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entity_type, entity_id, data, error.to_string(), unix_millis_now()],
        )?;
        tx.execute(
            "DELETE FROM entity_cache WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type, entity_id],
        )?;
        tx.commit()?;

        tracing::warn!(
            entity_type,
            entity_id,
            "Quarantined undecodable cache row: {error}"
        );
        Ok(())
    }

    fn current_version(&self, entity_type: &str, entity_id: &str) -> Result<Option<(u64, bool)>> {
        let row = self
            .conn
            .query_row(
                "SELECT version, origin FROM entity_cache WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(version, origin)| (version as u64, origin == ORIGIN_LOCAL)))
    }

    fn validate_key(entity_type: &str, entity_id: &str) -> Result<()> {
        if entity_type.trim().is_empty() || entity_id.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "cache key requires entity type and id, got '{entity_type}'/'{entity_id}'"
            )));
        }
        Ok(())
    }
}

impl EntityCacheRepository for SqliteEntityCache<'_> {
    fn upsert(&self, entity_type: &str, entity_id: &str, value: &serde_json::Value) -> Result<()> {
        Self::validate_key(entity_type, entity_id)?;
        let data = serde_json::to_string(value)?;

        self.conn.execute(
            "INSERT INTO entity_cache (entity_type, entity_id, version, data, origin, is_deleted, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4, 0, ?5)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                data = excluded.data,
                origin = excluded.origin,
                is_deleted = 0,
                updated_at = excluded.updated_at",
            params![entity_type, entity_id, data, ORIGIN_LOCAL, unix_millis_now()],
        )?;
        Ok(())
    }

    fn mark_deleted(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        Self::validate_key(entity_type, entity_id)?;

        self.conn.execute(
            "INSERT INTO entity_cache (entity_type, entity_id, version, data, origin, is_deleted, updated_at)
             VALUES (?1, ?2, 0, 'null', ?3, 1, ?4)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                origin = excluded.origin,
                is_deleted = 1,
                updated_at = excluded.updated_at",
            params![entity_type, entity_id, ORIGIN_LOCAL, unix_millis_now()],
        )?;
        Ok(())
    }

    fn apply_change(&self, change: &ChangeEntry) -> Result<ApplyOutcome> {
        Self::validate_key(&change.entity_type, &change.entity_id)?;

        if let Some((cached_version, is_local)) =
            self.current_version(&change.entity_type, &change.entity_id)?
        {
            let newer = change.version > cached_version;
            let confirms_local = is_local && change.version >= cached_version;
            if !newer && !confirms_local {
                return Ok(ApplyOutcome::Stale);
            }
        }

        let (data, is_deleted) = match change.action {
            ChangeAction::Create | ChangeAction::Update => {
                let payload = change
                    .payload
                    .as_ref()
                    .filter(|payload| payload.is_object())
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "{} change for {}/{} has no object payload",
                            change.action, change.entity_type, change.entity_id
                        ))
                    })?;
                (serde_json::to_string(payload)?, false)
            }
            ChangeAction::Delete => (
                serde_json::to_string(change.payload.as_ref().unwrap_or(&serde_json::Value::Null))?,
                true,
            ),
        };

        self.conn.execute(
            "INSERT INTO entity_cache (entity_type, entity_id, version, data, origin, is_deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                version = excluded.version,
                data = excluded.data,
                origin = excluded.origin,
                is_deleted = excluded.is_deleted,
                updated_at = excluded.updated_at",
            params![
                change.entity_type,
                change.entity_id,
                change.version as i64,
                data,
                ORIGIN_SERVER,
                i32::from(is_deleted),
                unix_millis_now()
            ],
        )?;

        Ok(ApplyOutcome::Applied)
    }

    fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<CachedEntity>> {
        let raw = self
            .conn
            .query_row(
                "SELECT entity_type, entity_id, version, data, origin, is_deleted, updated_at
                 FROM entity_cache WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
                Self::parse_raw,
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let data = raw.data.clone();
        match Self::decode(raw) {
            Ok(entity) => Ok(Some(entity)),
            Err(error) => {
                self.quarantine(entity_type, entity_id, &data, &error)?;
                Ok(None)
            }
        }
    }

    fn list_by_type(&self, entity_type: &str) -> Result<Vec<CachedEntity>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, entity_id, version, data, origin, is_deleted, updated_at
             FROM entity_cache
             WHERE entity_type = ?1 AND is_deleted = 0
             ORDER BY entity_id ASC",
        )?;
        let rows = stmt
            .query_map(params![entity_type], Self::parse_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entities = Vec::with_capacity(rows.len());
        for raw in rows {
            let entity_id = raw.entity_id.clone();
            let data = raw.data.clone();
            match Self::decode(raw) {
                Ok(entity) => entities.push(entity),
                Err(error) => self.quarantine(entity_type, &entity_id, &data, &error)?,
            }
        }
        Ok(entities)
    }
}
