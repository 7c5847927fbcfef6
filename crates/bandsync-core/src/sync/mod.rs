//! Push/pull replication against the sync server.
//!
//! A sync cycle drains the local operation log to the server (PUSH) and then
//! fetches the tenant's change log since the persisted cursor (PULL). Queue
//! removal is gated on a positive acknowledgment per `clientId`, and cursor
//! advancement on full local application of the pulled batch, so an
//! abandoned cycle can always be re-run from scratch.

mod client;
mod http;
mod protocol;
mod transport;

pub use client::{CycleOutcome, CycleReport, ReconcileSummary, SyncClient, SyncOptions};
pub use http::HttpSyncTransport;
pub use protocol::{
    Acknowledgement, PullRequest, PullResponse, PushRequest, PushResponse, Rejection,
};
pub use transport::SyncTransport;

/// Identity carried explicitly through every sync call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    device_id: String,
    tenant_id: String,
    platform: String,
}

impl SyncContext {
    pub fn new(
        device_id: impl Into<String>,
        tenant_id: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            tenant_id: tenant_id.into(),
            platform: platform.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }
}
