//! Data models for bandsync

mod operation;
mod record;
mod schedule;
mod sync_conflict;

pub use operation::{
    ClientId, ClientOperation, EntityKind, OperationKind, QueuedOperation, SubOperation,
};
pub use record::{CachedEntity, ChangeAction, ChangeEntry, VersionedRecord};
pub use schedule::{
    AvailabilityEntry, AvailabilityStatus, CalendarWindow, CommitmentWindow, EventCategory,
    ProposedWindow, TimeWindow,
};
pub use sync_conflict::{ConflictKind, ConflictRecord, StoredConflict};
