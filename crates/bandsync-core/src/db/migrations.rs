//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate(conn, 1, V1_STATEMENTS)?;
    }
    if version < 2 {
        migrate(conn, 2, V2_STATEMENTS)?;
    }
    if version < 3 {
        migrate(conn, 3, V3_STATEMENTS)?;
    }
    if version < 4 {
        migrate(conn, 4, V4_STATEMENTS)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: operation log
const V1_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS operations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL UNIQUE,
        tenant_id TEXT NOT NULL,
        body TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_operations_tenant ON operations(tenant_id, seq)",
    "CREATE TABLE IF NOT EXISTS quarantined_operations (
        seq INTEGER PRIMARY KEY,
        client_id TEXT,
        tenant_id TEXT,
        body TEXT,
        error TEXT NOT NULL,
        quarantined_at INTEGER NOT NULL
    )",
];

/// Version 2: entity cache and pull cursors
const V2_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entity_cache (
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL,
        origin TEXT NOT NULL DEFAULT 'server',
        is_deleted INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, entity_id)
    )",
    "CREATE TABLE IF NOT EXISTS quarantined_cache_rows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        data TEXT,
        error TEXT NOT NULL,
        quarantined_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_cursors (
        tenant_id TEXT PRIMARY KEY,
        cursor TEXT,
        updated_at INTEGER NOT NULL
    )",
];

/// Version 3: server-reported conflicts
const V3_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        body TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        resolved_at INTEGER,
        resolution TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_client ON sync_conflicts(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_open ON sync_conflicts(tenant_id, resolved_at)",
];

/// Version 4: entity key on queued operations, for per-entity replay order
const V4_STATEMENTS: &[&str] = &[
    "ALTER TABLE operations ADD COLUMN entity_type TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE operations ADD COLUMN entity_id TEXT NOT NULL DEFAULT ''",
    "UPDATE operations SET
        entity_type = COALESCE(json_extract(body, '$.entity'), ''),
        entity_id = COALESCE(json_extract(body, '$.entityId'), '')
     WHERE json_valid(body)",
    "CREATE INDEX IF NOT EXISTS idx_operations_entity ON operations(entity_type, entity_id, seq)",
];

fn migrate(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    // Dropping the transaction without commit rolls every statement back
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} of {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_entity_key_backfilled_for_queued_rows() {
        let mut conn = setup();
        migrate(&mut conn, 1, V1_STATEMENTS).unwrap();
        conn.execute(
            "INSERT INTO operations (client_id, tenant_id, body, enqueued_at)
             VALUES ('c1', 'band-1', '{\"entity\":\"booking\",\"entityId\":\"bk-1\"}', 0),
                    ('c2', 'band-1', 'not json', 0)",
            [],
        )
        .unwrap();

        run(&mut conn).unwrap();

        let keys = conn
            .prepare("SELECT entity_type, entity_id FROM operations ORDER BY seq")
            .unwrap()
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            keys,
            vec![
                ("booking".to_string(), "bk-1".to_string()),
                (String::new(), String::new()),
            ]
        );
    }

    #[test]
    fn test_all_tables_created() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for table in [
            "operations",
            "quarantined_operations",
            "entity_cache",
            "quarantined_cache_rows",
            "sync_cursors",
            "sync_conflicts",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }
}
