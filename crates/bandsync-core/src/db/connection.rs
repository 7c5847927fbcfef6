//! Database connection management

use crate::error::{Error, Result};
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};

use super::migrations;

/// Database wrapper for the local `SQLite` store
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        let mut database = Self {
            conn,
            path: Some(path),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open the database, moving an unreadable file aside and starting fresh.
    ///
    /// The damaged file and its `-wal`/`-shm` sidecars are renamed to
    /// `<name>.corrupt-<millis>` so nothing is deleted outright.
    pub fn open_or_recover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open(path) {
            Err(error) if is_corrupt_file_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable ({error}); quarantining and recreating",
                    path.display()
                );
                quarantine_files(path)?;
                Self::open(path)
            }
            other => other,
        }
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let mut database = Self { conn, path: None };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durability of the operation log
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" instead of switching to WAL
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Filesystem location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable connection, needed to open transactions
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn is_corrupt_file_error(error: &Error) -> bool {
    matches!(
        error,
        Error::Database(rusqlite::Error::SqliteFailure(failure, _))
            if matches!(failure.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn quarantine_files(path: &Path) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    let suffix = format!("corrupt-{}", chrono::Utc::now().timestamp_millis());

    for sidecar in ["", "-wal", "-shm"] {
        let source = path.with_file_name(format!("{file_name}{sidecar}"));
        if !source.exists() {
            continue;
        }
        let target = path.with_file_name(format!("{file_name}{sidecar}.{suffix}"));
        std::fs::rename(&source, &target)?;
        tracing::warn!(
            "Moved {} to {}",
            source.display(),
            target.display()
        );
    }
    Ok(())
}
