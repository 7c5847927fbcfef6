//! Transport seam between the sync client and the server

use crate::error::Result;

use super::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

/// The push/pull contract consumed by `SyncClient`.
///
/// Any error returned here is treated as "nothing happened on the server
/// side that the client knows about": the queue and cursor stay untouched.
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Submit a batch of queued operations
    async fn push(&self, request: &PushRequest) -> Result<PushResponse>;

    /// Fetch change-log entries after the given cursor
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse>;
}
