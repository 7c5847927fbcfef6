//! bandsync-core - offline-first sync core for band scheduling clients
//!
//! This crate contains the durable operation log, the local entity cache,
//! the push/pull sync client, version reconciliation and schedule conflict
//! detection shared by every bandsync frontend.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod scheduling;
pub mod state;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{ClientId, ClientOperation, EntityKind, OperationKind};
pub use state::SyncState;
pub use sync::{SyncClient, SyncContext};
