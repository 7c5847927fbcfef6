//! Per-tenant pull cursor storage

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::util::unix_millis_now;

/// Storage operations for PULL progress markers
pub trait CursorRepository {
    /// Persisted cursor, `None` meaning "from the beginning"
    fn load(&self, tenant_id: &str) -> Result<Option<String>>;

    fn save(&self, tenant_id: &str, cursor: Option<&str>) -> Result<()>;
}

/// `SQLite` implementation of `CursorRepository`
pub struct SqliteCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCursorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CursorRepository for SqliteCursorRepository<'_> {
    fn load(&self, tenant_id: &str) -> Result<Option<String>> {
        let cursor: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT cursor FROM sync_cursors WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }

    fn save(&self, tenant_id: &str, cursor: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_cursors (tenant_id, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at",
            params![tenant_id, cursor, unix_millis_now()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_missing_cursor_is_none() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCursorRepository::new(db.connection());
        assert_eq!(repo.load("band-1").unwrap(), None);
    }

    #[test]
    fn test_cursor_is_per_tenant() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCursorRepository::new(db.connection());

        repo.save("band-1", Some("c-10")).unwrap();
        repo.save("band-2", Some("c-2")).unwrap();
        repo.save("band-1", Some("c-11")).unwrap();

        assert_eq!(repo.load("band-1").unwrap().as_deref(), Some("c-11"));
        assert_eq!(repo.load("band-2").unwrap().as_deref(), Some("c-2"));
    }
}
