//! Database layer for bandsync

mod conflict_repository;
mod connection;
mod cursor_repository;
mod entity_cache;
mod migrations;
mod operation_log;

pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use cursor_repository::{CursorRepository, SqliteCursorRepository};
pub use entity_cache::{ApplyOutcome, EntityCacheRepository, SqliteEntityCache};
pub use operation_log::{OperationLogRepository, SqliteOperationLog};
