//! Sync client: optimistic enqueue, coalesced push/pull cycles and
//! conflict reconciliation over the local store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::config::ClientConfig;
use crate::db::{
    ConflictRepository, CursorRepository, Database, EntityCacheRepository, OperationLogRepository,
    SqliteConflictRepository, SqliteCursorRepository, SqliteEntityCache, SqliteOperationLog,
    ApplyOutcome,
};
use crate::error::{Error, Result};
use crate::models::{
    CachedEntity, ChangeAction, ChangeEntry, ClientId, ClientOperation, ConflictKind, EntityKind,
    OperationKind, QueuedOperation, StoredConflict, VersionedRecord,
};
use crate::reconcile::{merge_patch, resolve_version_conflict, ResolutionReason, ResolutionStrategy};
use crate::state::SyncState;

use super::http::HttpSyncTransport;
use super::protocol::{PullRequest, PullResponse, PushRequest, PushResponse, Rejection};
use super::transport::SyncTransport;
use super::SyncContext;

const KEPT_LOCAL: &str = "kept-local";
const KEPT_SERVER: &str = "kept-server";

/// Batching limits for one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub push_batch_size: usize,
    pub pull_batch_size: usize,
    pub max_pull_batches: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_batch_size: 100,
            pull_batch_size: 500,
            max_pull_batches: 20,
        }
    }
}

impl From<&ClientConfig> for SyncOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            push_batch_size: config.push_batch_size,
            pull_batch_size: config.pull_batch_size,
            max_pull_batches: config.max_pull_batches,
        }
    }
}

/// What a completed cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Operations submitted to the server
    pub pushed: usize,
    pub accepted: usize,
    /// Operations parked behind a newly recorded conflict
    pub conflicts: usize,
    /// Operations the server refused outright; removed from the queue
    pub rejected: Vec<Rejection>,
    /// Change-log entries received
    pub pulled: usize,
    pub applied: usize,
    /// Re-deliveries the cache already held
    pub stale: usize,
    /// Cursor persisted at the end of the cycle
    pub cursor: Option<String>,
    /// Push/pull passes run, including coalesced re-runs
    pub passes: usize,
}

impl CycleReport {
    fn absorb(&mut self, pass: Self) {
        self.pushed += pass.pushed;
        self.accepted += pass.accepted;
        self.conflicts += pass.conflicts;
        self.rejected.extend(pass.rejected);
        self.pulled += pass.pulled;
        self.applied += pass.applied;
        self.stale += pass.stale;
        self.cursor = pass.cursor;
        self.passes += pass.passes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// A cycle was already running; it re-runs once more before finishing
    Coalesced,
}

/// Tally of one `reconcile_conflicts` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Local operation rebased onto the server version and re-queued
    pub client_won: usize,
    /// Local operation dropped and the server record cached
    pub server_won: usize,
    /// Left open for the user
    pub needs_manual: usize,
}

/// Drives replication for one device and tenant.
///
/// The database sits behind an async mutex that is never held across a
/// transport call, so `enqueue` and reads stay responsive while a cycle is
/// waiting on the network.
pub struct SyncClient<T> {
    context: SyncContext,
    options: SyncOptions,
    transport: T,
    db: Mutex<Database>,
    cycle_gate: Mutex<()>,
    rerun_requested: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl SyncClient<HttpSyncTransport> {
    /// Client talking to the configured sync API
    pub fn from_config(config: &ClientConfig, db: Database) -> Result<Self> {
        let transport = HttpSyncTransport::new(config)?;
        Ok(Self::new(
            config.sync_context(),
            db,
            transport,
            SyncOptions::from(config),
        ))
    }
}

impl<T: SyncTransport> SyncClient<T> {
    pub fn new(context: SyncContext, db: Database, transport: T, options: SyncOptions) -> Self {
        let (state, _) = watch::channel(SyncState::Offline);
        Self {
            context,
            options,
            transport,
            db: Mutex::new(db),
            cycle_gate: Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            state,
        }
    }

    pub const fn context(&self) -> &SyncContext {
        &self.context
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Current sync state
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch sync state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Durably queue a local mutation and reflect it in the cache.
    ///
    /// The queue write must succeed; the optimistic cache write is
    /// best-effort and is superseded by the next pull either way.
    pub async fn enqueue(&self, operation: ClientOperation) -> Result<ClientId> {
        if operation.tenant_scope_id != self.context.tenant_id() {
            return Err(Error::InvalidInput(format!(
                "operation targets tenant '{}' but this client syncs '{}'",
                operation.tenant_scope_id,
                self.context.tenant_id()
            )));
        }

        let db = self.db.lock().await;
        let conn = db.connection();
        let seq = SqliteOperationLog::new(conn).enqueue(&operation)?;
        if let Err(error) = apply_optimistic(conn, &operation) {
            tracing::warn!(
                client_id = %operation.client_id,
                "Optimistic cache write failed: {error}"
            );
        }

        tracing::debug!(
            seq,
            client_id = %operation.client_id,
            entity = %operation.entity,
            operation = %operation.operation,
            "Queued operation"
        );
        Ok(operation.client_id)
    }

    /// Run one PUSH then PULL cycle.
    ///
    /// A trigger that arrives while a cycle is in flight does not start a
    /// second one; it returns `Coalesced` and the running cycle makes one
    /// more pass before it finishes. On error nothing past the last durable
    /// step has changed, so the caller may simply trigger again later.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_gate.try_lock() else {
            self.rerun_requested.store(true, Ordering::SeqCst);
            tracing::debug!("Sync cycle already running; trigger coalesced");
            return Ok(CycleOutcome::Coalesced);
        };
        self.rerun_requested.store(false, Ordering::SeqCst);

        let mut report = CycleReport::default();
        loop {
            match self.run_pass().await {
                Ok(pass) => report.absorb(pass),
                Err(error) => {
                    let state = if error.is_retriable() {
                        SyncState::Offline
                    } else {
                        SyncState::Error
                    };
                    self.state.send_replace(state);
                    tracing::warn!(state = state.label(), "Sync cycle failed: {error}");
                    return Err(error);
                }
            }
            if !self.rerun_requested.swap(false, Ordering::SeqCst) {
                break;
            }
        }

        self.state.send_replace(SyncState::Synced);
        tracing::info!(
            pushed = report.pushed,
            accepted = report.accepted,
            conflicts = report.conflicts,
            rejected = report.rejected.len(),
            pulled = report.pulled,
            applied = report.applied,
            passes = report.passes,
            "Sync cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }

    async fn run_pass(&self) -> Result<CycleReport> {
        self.state.send_replace(SyncState::Syncing);
        let mut report = CycleReport {
            passes: 1,
            ..CycleReport::default()
        };
        self.push_pending(&mut report).await?;
        self.pull_changes(&mut report).await?;
        Ok(report)
    }

    /// Drain the queue forward once.
    ///
    /// Each operation is offered at most once per cycle; anything the server
    /// leaves unanswered waits for the next cycle.
    async fn push_pending(&self, report: &mut CycleReport) -> Result<()> {
        let tenant_id = self.context.tenant_id();
        let mut last_sent = 0;
        loop {
            let batch = {
                let db = self.db.lock().await;
                SqliteOperationLog::new(db.connection()).list_pushable(
                    tenant_id,
                    last_sent,
                    self.options.push_batch_size,
                )?
            };
            let Some(last) = batch.last() else {
                return Ok(());
            };
            last_sent = last.seq;

            let request = PushRequest {
                device_id: self.context.device_id().to_string(),
                tenant_id: tenant_id.to_string(),
                platform: self.context.platform().to_string(),
                operations: batch
                    .iter()
                    .map(|queued| queued.operation.clone())
                    .collect(),
            };
            let response = self.transport.push(&request).await?;

            let db = self.db.lock().await;
            self.apply_push_response(db.connection(), &batch, response, report)?;
        }
    }

    /// Record conflicts and drop acknowledged or rejected operations, all or
    /// nothing.
    ///
    /// Acks and rejections for operations outside this batch are ignored.
    /// Conflicts are always kept.
    fn apply_push_response(
        &self,
        conn: &Connection,
        batch: &[QueuedOperation],
        response: PushResponse,
        report: &mut CycleReport,
    ) -> Result<()> {
        let sent = batch
            .iter()
            .map(|queued| queued.operation.client_id)
            .collect::<HashSet<_>>();
        let accepted = response
            .accepted
            .iter()
            .map(|ack| ack.client_id)
            .filter(|client_id| sent.contains(client_id))
            .collect::<Vec<_>>();
        let rejected = response
            .rejected
            .into_iter()
            .filter(|rejection| sent.contains(&rejection.client_id))
            .collect::<Vec<_>>();
        let removals = accepted
            .iter()
            .copied()
            .chain(rejected.iter().map(|rejection| rejection.client_id))
            .collect::<Vec<_>>();

        let tx = conn.unchecked_transaction()?;
        let conflicts = SqliteConflictRepository::new(&tx);
        for conflict in &response.conflicts {
            conflicts.record(self.context.tenant_id(), conflict)?;
            if sent.contains(&conflict.client_id) {
                tracing::info!(
                    client_id = %conflict.client_id,
                    entity = %conflict.entity,
                    entity_id = %conflict.entity_id,
                    kind = %conflict.kind,
                    "Operation parked behind conflict"
                );
            } else {
                tracing::warn!(
                    client_id = %conflict.client_id,
                    entity = %conflict.entity,
                    entity_id = %conflict.entity_id,
                    "Recorded conflict for an operation outside the pushed batch"
                );
            }
        }
        SqliteOperationLog::new(&tx).acknowledge(&removals)?;
        tx.commit()?;

        for rejection in &rejected {
            tracing::warn!(
                client_id = %rejection.client_id,
                "Server rejected operation: {}",
                rejection.reason
            );
        }
        report.pushed += batch.len();
        report.accepted += accepted.len();
        report.conflicts += response.conflicts.len();
        report.rejected.extend(rejected);
        Ok(())
    }

    async fn pull_changes(&self, report: &mut CycleReport) -> Result<()> {
        let tenant_id = self.context.tenant_id();
        let mut cursor = {
            let db = self.db.lock().await;
            SqliteCursorRepository::new(db.connection()).load(tenant_id)?
        };
        report.cursor.clone_from(&cursor);

        for _ in 0..self.options.max_pull_batches {
            let request = PullRequest {
                device_id: self.context.device_id().to_string(),
                tenant_id: tenant_id.to_string(),
                cursor: cursor.clone(),
                limit: self.options.pull_batch_size,
            };
            let response = self.transport.pull(&request).await?;
            let received = response.changes.len();
            // A missing cursor never rewinds an existing one
            let next_cursor = response.cursor.clone().or_else(|| cursor.clone());

            let (applied, stale) = {
                let mut db = self.db.lock().await;
                apply_pull_batch(
                    db.connection_mut(),
                    tenant_id,
                    &response,
                    next_cursor.as_deref(),
                )?
            };
            report.pulled += received;
            report.applied += applied;
            report.stale += stale;

            let advanced = next_cursor != cursor;
            cursor = next_cursor;
            report.cursor.clone_from(&cursor);

            if received < self.options.pull_batch_size || !advanced {
                break;
            }
        }
        Ok(())
    }

    /// Settle open conflicts with the given strategy.
    ///
    /// Version mismatches carrying a server record go through the
    /// reconciler. Business-rule conflicts, and anything the strategy
    /// declines to decide, stay open for `resolve_conflict_manually`.
    pub async fn reconcile_conflicts(&self, strategy: ResolutionStrategy) -> Result<ReconcileSummary> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let open = SqliteConflictRepository::new(conn).list_open(self.context.tenant_id())?;

        let mut summary = ReconcileSummary::default();
        for stored in open {
            if stored.conflict.kind != ConflictKind::VersionMismatch {
                summary.needs_manual += 1;
                continue;
            }
            let Some(server) = stored.conflict.server_record.clone() else {
                summary.needs_manual += 1;
                continue;
            };

            let queued = SqliteOperationLog::new(conn).get(&stored.conflict.client_id)?;
            let client = stored
                .conflict
                .client_record
                .clone()
                .or_else(|| queued.as_ref().map(|queued| client_view(&queued.operation)));
            let Some(client) = client else {
                // Nothing local left to keep
                keep_server(conn, &stored, Some(&server), ResolutionReason::ServerNewer.as_str())?;
                summary.server_won += 1;
                continue;
            };

            let resolution = resolve_version_conflict(&client, &server, strategy);
            if !resolution.resolved {
                summary.needs_manual += 1;
                continue;
            }
            match resolution.reason {
                ResolutionReason::ClientNewer => {
                    keep_local(
                        conn,
                        &stored,
                        queued,
                        Some(&server),
                        Some(&resolution.record),
                        resolution.reason.as_str(),
                    )?;
                    summary.client_won += 1;
                }
                ResolutionReason::ServerNewer | ResolutionReason::ManualMergeRequired => {
                    keep_server(conn, &stored, Some(&server), resolution.reason.as_str())?;
                    summary.server_won += 1;
                }
            }
        }

        tracing::info!(
            client_won = summary.client_won,
            server_won = summary.server_won,
            needs_manual = summary.needs_manual,
            strategy = ?strategy,
            "Reconciled conflicts"
        );
        Ok(summary)
    }

    /// Settle one conflict by hand, keeping either the local or the server copy
    pub async fn resolve_conflict_manually(&self, conflict_id: i64, keep_local_copy: bool) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let stored = SqliteConflictRepository::new(conn)
            .get(conflict_id)?
            .filter(|stored| stored.tenant_id == self.context.tenant_id())
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if stored.is_resolved() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let server = stored.conflict.server_record.clone();
        if keep_local_copy {
            let queued = SqliteOperationLog::new(conn).get(&stored.conflict.client_id)?;
            let record = stored.conflict.client_record.clone();
            keep_local(conn, &stored, queued, server.as_ref(), record.as_ref(), KEPT_LOCAL)?;
        } else {
            keep_server(conn, &stored, server.as_ref(), KEPT_SERVER)?;
        }

        tracing::info!(conflict_id, keep_local = keep_local_copy, "Resolved conflict manually");
        Ok(())
    }

    /// Operations still queued for this tenant, parked ones included
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOperationLog::new(db.connection()).count_for_tenant(self.context.tenant_id())
    }

    pub async fn pending(&self, limit: usize) -> Result<Vec<QueuedOperation>> {
        let db = self.db.lock().await;
        SqliteOperationLog::new(db.connection())
            .list_pending_for_tenant(self.context.tenant_id(), limit)
    }

    pub async fn quarantined_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOperationLog::new(db.connection()).count_quarantined()
    }

    pub async fn conflict_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).count_open(self.context.tenant_id())
    }

    /// Recent conflicts, newest first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<StoredConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_recent(self.context.tenant_id(), limit)
    }

    pub async fn cursor(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        SqliteCursorRepository::new(db.connection()).load(self.context.tenant_id())
    }

    /// Live cached entities of one kind
    pub async fn list_cached(&self, kind: EntityKind) -> Result<Vec<CachedEntity>> {
        let db = self.db.lock().await;
        SqliteEntityCache::new(db.connection()).list_by_type(kind.as_str())
    }

    pub async fn cached(&self, kind: EntityKind, entity_id: &str) -> Result<Option<CachedEntity>> {
        let db = self.db.lock().await;
        SqliteEntityCache::new(db.connection()).get(kind.as_str(), entity_id)
    }
}

/// Reflect a queued mutation in the cache ahead of server confirmation
fn apply_optimistic(conn: &Connection, operation: &ClientOperation) -> Result<()> {
    let cache = SqliteEntityCache::new(conn);
    let entity_type = operation.entity.as_str();

    match operation.operation {
        OperationKind::Create => match &operation.payload {
            Some(payload) => cache.upsert(entity_type, &operation.entity_id, payload),
            None => Ok(()),
        },
        OperationKind::Update => {
            let Some(payload) = &operation.payload else {
                return Ok(());
            };
            let base = cache
                .get(entity_type, &operation.entity_id)?
                .filter(|cached| !cached.is_deleted)
                .map_or(Value::Null, |cached| cached.data);
            let merged = merge_patch(&base, payload)?;
            cache.upsert(entity_type, &operation.entity_id, &merged)
        }
        OperationKind::Delete => cache.mark_deleted(entity_type, &operation.entity_id),
        // Positions live on the child rows; the pull delivers them
        OperationKind::ReorderBatch => Ok(()),
    }
}

/// Apply one pulled batch and advance the cursor atomically.
///
/// Any failure rolls back both, leaving the cursor where the batch started.
fn apply_pull_batch(
    conn: &mut Connection,
    tenant_id: &str,
    response: &PullResponse,
    next_cursor: Option<&str>,
) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let mut applied = 0;
    let mut stale = 0;
    {
        let cache = SqliteEntityCache::new(&tx);
        for change in &response.changes {
            match cache.apply_change(change)? {
                ApplyOutcome::Applied => applied += 1,
                ApplyOutcome::Stale => stale += 1,
            }
        }
        SqliteCursorRepository::new(&tx).save(tenant_id, next_cursor)?;
    }
    tx.commit()?;

    tracing::debug!(
        applied,
        stale,
        cursor = next_cursor.unwrap_or("<none>"),
        "Applied pulled batch"
    );
    Ok((applied, stale))
}

/// The client's side of a conflict, rebuilt from the queued operation
fn client_view(operation: &ClientOperation) -> VersionedRecord {
    VersionedRecord::new(
        operation.entity_id.clone(),
        operation.base_version.unwrap_or(0),
        operation.updated_at.clone(),
        operation.payload.clone().unwrap_or(Value::Null),
    )
}

/// Rebase the queued operation onto the server version and release it for push
fn keep_local(
    conn: &Connection,
    stored: &StoredConflict,
    queued: Option<QueuedOperation>,
    server: Option<&VersionedRecord>,
    winner: Option<&VersionedRecord>,
    resolution: &str,
) -> Result<()> {
    if let Some(queued) = queued {
        let mut operation = queued.operation;
        if let Some(server) = server {
            operation.base_version = Some(server.version);
        }
        if let Some(winner) = winner {
            let carries_payload =
                matches!(operation.operation, OperationKind::Create | OperationKind::Update);
            if carries_payload && winner.data.is_object() {
                operation.payload = Some(winner.data.clone());
            }
        }
        SqliteOperationLog::new(conn).update_operation(&operation)?;
        apply_optimistic(conn, &operation)?;
    } else {
        tracing::warn!(
            conflict_id = stored.id,
            client_id = %stored.conflict.client_id,
            "Conflicted operation is no longer queued; nothing to re-push"
        );
    }

    SqliteConflictRepository::new(conn).resolve(stored.id, resolution)
}

/// Drop the queued operation and cache the server record
fn keep_server(
    conn: &Connection,
    stored: &StoredConflict,
    server: Option<&VersionedRecord>,
    resolution: &str,
) -> Result<()> {
    SqliteOperationLog::new(conn).acknowledge(&[stored.conflict.client_id])?;

    if let Some(server) = server {
        let action = match &server.data {
            Value::Object(_) => Some(ChangeAction::Update),
            Value::Null => Some(ChangeAction::Delete),
            _ => None,
        };
        match action {
            Some(action) => {
                SqliteEntityCache::new(conn).apply_change(&ChangeEntry {
                    entity_type: stored.conflict.entity.as_str().to_string(),
                    entity_id: stored.conflict.entity_id.clone(),
                    action,
                    payload: Some(server.data.clone()),
                    version: server.version,
                })?;
            }
            None => tracing::warn!(
                conflict_id = stored.id,
                "Server record is not an object; leaving cache for the next pull"
            ),
        }
    }

    SqliteConflictRepository::new(conn).resolve(stored.id, resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictRecord;
    use crate::sync::Acknowledgement;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Holds a push open until the test releases it
    #[derive(Default)]
    struct PushGate {
        entered: Notify,
        release: Notify,
    }

    /// In-memory transport replaying scripted responses.
    ///
    /// Unscripted pushes accept everything sent; unscripted pulls return
    /// an empty batch at the same cursor.
    #[derive(Default)]
    struct ScriptedTransport {
        push_script: std::sync::Mutex<VecDeque<Result<PushResponse>>>,
        pull_script: std::sync::Mutex<VecDeque<Result<PullResponse>>>,
        pushes: std::sync::Mutex<Vec<PushRequest>>,
        pulls: std::sync::Mutex<Vec<PullRequest>>,
        gate: Option<Arc<PushGate>>,
    }

    impl ScriptedTransport {
        fn script_push(&self, response: Result<PushResponse>) {
            self.push_script.lock().unwrap().push_back(response);
        }

        fn script_pull(&self, response: Result<PullResponse>) {
            self.pull_script.lock().unwrap().push_back(response);
        }

        fn pushes(&self) -> Vec<PushRequest> {
            self.pushes.lock().unwrap().clone()
        }

        fn pulls(&self) -> Vec<PullRequest> {
            self.pulls.lock().unwrap().clone()
        }
    }

    impl SyncTransport for ScriptedTransport {
        async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
            self.pushes.lock().unwrap().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            let scripted = self.push_script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(PushResponse {
                    accepted: request
                        .operations
                        .iter()
                        .map(|op| Acknowledgement {
                            client_id: op.client_id,
                        })
                        .collect(),
                    ..PushResponse::default()
                })
            })
        }

        async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
            self.pulls.lock().unwrap().push(request.clone());
            let scripted = self.pull_script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(PullResponse {
                    cursor: request.cursor.clone(),
                    changes: Vec::new(),
                })
            })
        }
    }

    fn client_with(transport: ScriptedTransport, options: SyncOptions) -> SyncClient<ScriptedTransport> {
        SyncClient::new(
            SyncContext::new("dev-1", "band-1", "test"),
            Database::open_in_memory().unwrap(),
            transport,
            options,
        )
    }

    fn setup() -> SyncClient<ScriptedTransport> {
        client_with(ScriptedTransport::default(), SyncOptions::default())
    }

    fn update(entity_id: &str, updated_at: &str, payload: Value) -> ClientOperation {
        let mut op = ClientOperation::new(EntityKind::Booking, OperationKind::Update, entity_id, "band-1")
            .with_payload(payload)
            .with_base_version(3);
        op.updated_at = updated_at.to_string();
        op
    }

    fn change(entity_id: &str, version: u64, payload: Option<Value>) -> ChangeEntry {
        ChangeEntry {
            entity_type: "booking".into(),
            entity_id: entity_id.into(),
            action: ChangeAction::Update,
            payload,
            version,
        }
    }

    fn version_conflict(op: &ClientOperation, server: VersionedRecord) -> ConflictRecord {
        ConflictRecord {
            client_id: op.client_id,
            entity: op.entity,
            entity_id: op.entity_id.clone(),
            kind: ConflictKind::VersionMismatch,
            message: Some("stale base version".into()),
            server_record: Some(server),
            client_record: None,
        }
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Coalesced => panic!("expected a completed cycle"),
        }
    }

    #[tokio::test]
    async fn test_enqueue_writes_optimistic_cache() {
        let client = setup();

        let create = ClientOperation::new(EntityKind::Event, OperationKind::Create, "ev-1", "band-1")
            .with_payload(json!({"title": "Gig", "venue": {"name": "Hall", "city": "Oslo"}}));
        client.enqueue(create).await.unwrap();
        let patch = ClientOperation::new(EntityKind::Event, OperationKind::Update, "ev-1", "band-1")
            .with_payload(json!({"venue": {"city": "Bergen"}}));
        client.enqueue(patch).await.unwrap();

        let cached = client.cached(EntityKind::Event, "ev-1").await.unwrap().unwrap();
        assert!(cached.is_local);
        assert_eq!(
            cached.data,
            json!({"title": "Gig", "venue": {"name": "Hall", "city": "Bergen"}})
        );
        assert_eq!(client.pending_count().await.unwrap(), 2);

        let delete = ClientOperation::new(EntityKind::Event, OperationKind::Delete, "ev-1", "band-1");
        client.enqueue(delete).await.unwrap();
        assert!(client.list_cached(EntityKind::Event).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_foreign_tenant() {
        let client = setup();
        let op = ClientOperation::new(EntityKind::Event, OperationKind::Delete, "ev-1", "band-2");
        assert!(matches!(client.enqueue(op).await, Err(Error::InvalidInput(_))));
        assert_eq!(client.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_removes_only_acknowledged_operations() {
        let client = setup();
        let accepted = update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 1}));
        let conflicted = update("bk-2", "2026-03-10T18:00:00Z", json!({"fee": 2}));
        let rejected = update("bk-3", "2026-03-10T18:00:00Z", json!({"fee": 3}));
        let unanswered = update("bk-4", "2026-03-10T18:00:00Z", json!({"fee": 4}));
        for op in [&accepted, &conflicted, &rejected, &unanswered] {
            client.enqueue(op.clone()).await.unwrap();
        }

        client.transport().script_push(Ok(PushResponse {
            accepted: vec![Acknowledgement {
                client_id: accepted.client_id,
            }],
            conflicts: vec![version_conflict(
                &conflicted,
                VersionedRecord::new("bk-2", 4, "2026-03-10T19:00:00Z", json!({"fee": 20})),
            )],
            rejected: vec![Rejection {
                client_id: rejected.client_id,
                reason: "fee must be positive".into(),
            }],
        }));
        let report = completed(client.run_cycle().await.unwrap());

        assert_eq!(report.pushed, 4);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].client_id, rejected.client_id);

        let pending = client
            .pending(10)
            .await
            .unwrap()
            .into_iter()
            .map(|queued| queued.operation.client_id)
            .collect::<Vec<_>>();
        assert_eq!(pending, vec![conflicted.client_id, unanswered.client_id]);
        assert_eq!(client.conflict_count().await.unwrap(), 1);
        // Unanswered operations wait for the next cycle
        assert_eq!(client.transport().pushes().len(), 1);

        let report = completed(client.run_cycle().await.unwrap());
        assert_eq!(report.accepted, 1);
        let resent = &client.transport().pushes()[1];
        assert_eq!(resent.operations.len(), 1);
        assert_eq!(resent.operations[0].client_id, unanswered.client_id);
    }

    #[tokio::test]
    async fn test_push_pages_forward_through_batches() {
        let options = SyncOptions {
            push_batch_size: 2,
            ..SyncOptions::default()
        };
        let client = client_with(ScriptedTransport::default(), options);
        let ops = (1..=3)
            .map(|n| update(&format!("bk-{n}"), "2026-03-10T18:00:00Z", json!({"fee": n})))
            .collect::<Vec<_>>();
        for op in &ops {
            client.enqueue(op.clone()).await.unwrap();
        }
        // First batch goes unanswered; the second is accepted by default
        client.transport().script_push(Ok(PushResponse::default()));

        let report = completed(client.run_cycle().await.unwrap());

        let sent = client
            .transport()
            .pushes()
            .into_iter()
            .map(|request| {
                request
                    .operations
                    .into_iter()
                    .map(|op| op.entity_id)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        assert_eq!(sent, vec![vec!["bk-1", "bk-2"], vec!["bk-3"]]);
        assert_eq!(report.accepted, 1);
        assert_eq!(client.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_later_edits_wait_behind_parked_operation() {
        let client = setup();
        let first = update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 100}));
        client.enqueue(first.clone()).await.unwrap();
        client.transport().script_push(Ok(PushResponse {
            conflicts: vec![version_conflict(
                &first,
                VersionedRecord::new("bk-1", 4, "2026-03-10T17:00:00Z", json!({"fee": 50})),
            )],
            ..PushResponse::default()
        }));
        client.run_cycle().await.unwrap();

        let second = update("bk-1", "2026-03-10T18:30:00Z", json!({"fee": 200}));
        let other = update("bk-2", "2026-03-10T18:30:00Z", json!({"fee": 7}));
        client.enqueue(second.clone()).await.unwrap();
        client.enqueue(other.clone()).await.unwrap();
        client.run_cycle().await.unwrap();

        // Only the unrelated entity went out
        let pushes = client.transport().pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[1].operations.len(), 1);
        assert_eq!(pushes[1].operations[0].client_id, other.client_id);

        let summary = client
            .reconcile_conflicts(ResolutionStrategy::LastWriteWins)
            .await
            .unwrap();
        assert_eq!(summary.client_won, 1);
        client.run_cycle().await.unwrap();

        let fees = client
            .transport()
            .pushes()
            .iter()
            .skip(2)
            .flat_map(|request| request.operations.clone())
            .filter(|op| op.entity_id == "bk-1")
            .map(|op| op.payload.unwrap()["fee"].clone())
            .collect::<Vec<_>>();
        assert_eq!(fees, vec![json!(100), json!(200)]);
        assert_eq!(client.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conflict_outside_batch_is_still_recorded() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 1}));
        client.enqueue(op.clone()).await.unwrap();

        let stray = update("bk-9", "2026-03-10T18:00:00Z", json!({"fee": 9}));
        client.transport().script_push(Ok(PushResponse {
            accepted: vec![Acknowledgement {
                client_id: op.client_id,
            }],
            conflicts: vec![version_conflict(
                &stray,
                VersionedRecord::new("bk-9", 2, "2026-03-10T19:00:00Z", json!({"fee": 90})),
            )],
            ..PushResponse::default()
        }));

        let report = completed(client.run_cycle().await.unwrap());
        assert_eq!(report.accepted, 1);
        assert_eq!(report.conflicts, 1);
        let conflicts = client.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict.client_id, stray.client_id);
        assert_eq!(client.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_parked_operation_is_not_resubmitted() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 1}));
        client.enqueue(op.clone()).await.unwrap();

        client.transport().script_push(Ok(PushResponse {
            conflicts: vec![version_conflict(
                &op,
                VersionedRecord::new("bk-1", 4, "2026-03-10T19:00:00Z", json!({"fee": 9})),
            )],
            ..PushResponse::default()
        }));
        client.run_cycle().await.unwrap();
        client.run_cycle().await.unwrap();

        assert_eq!(client.transport().pushes().len(), 1);
        assert_eq!(client.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_leaves_queue_untouched() {
        let client = setup();
        client
            .enqueue(update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 1})))
            .await
            .unwrap();
        client
            .transport()
            .script_push(Err(Error::Transport("connection reset".into())));

        let error = client.run_cycle().await.unwrap_err();
        assert!(error.is_retriable());
        assert_eq!(client.state(), SyncState::Offline);
        assert_eq!(client.pending_count().await.unwrap(), 1);
        assert!(client.transport().pulls().is_empty());

        let report = completed(client.run_cycle().await.unwrap());
        assert_eq!(report.accepted, 1);
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert_eq!(client.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn test_pull_follows_cursor_across_batches() {
        let options = SyncOptions {
            pull_batch_size: 2,
            ..SyncOptions::default()
        };
        let client = client_with(ScriptedTransport::default(), options);
        client.transport().script_pull(Ok(PullResponse {
            cursor: Some("c1".into()),
            changes: vec![
                change("bk-1", 1, Some(json!({"fee": 1}))),
                change("bk-2", 1, Some(json!({"fee": 2}))),
            ],
        }));
        client.transport().script_pull(Ok(PullResponse {
            cursor: Some("c2".into()),
            changes: vec![change("bk-1", 1, Some(json!({"fee": 1})))],
        }));

        let report = completed(client.run_cycle().await.unwrap());
        assert_eq!(report.pulled, 3);
        assert_eq!(report.applied, 2);
        assert_eq!(report.stale, 1);
        assert_eq!(report.cursor.as_deref(), Some("c2"));

        let cursors = client
            .transport()
            .pulls()
            .into_iter()
            .map(|request| request.cursor)
            .collect::<Vec<_>>();
        assert_eq!(cursors, vec![None, Some("c1".to_string())]);
        assert_eq!(client.cursor().await.unwrap().as_deref(), Some("c2"));
        assert_eq!(client.list_cached(EntityKind::Booking).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pull_stops_at_batch_limit() {
        let options = SyncOptions {
            pull_batch_size: 1,
            max_pull_batches: 2,
            ..SyncOptions::default()
        };
        let client = client_with(ScriptedTransport::default(), options);
        for (index, cursor) in ["c1", "c2", "c3"].into_iter().enumerate() {
            client.transport().script_pull(Ok(PullResponse {
                cursor: Some(cursor.into()),
                changes: vec![change(&format!("bk-{index}"), 1, Some(json!({})))],
            }));
        }

        let report = completed(client.run_cycle().await.unwrap());
        assert_eq!(client.transport().pulls().len(), 2);
        assert_eq!(report.cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_interrupted_pull_does_not_advance_cursor() {
        let client = setup();
        client.transport().script_pull(Ok(PullResponse {
            cursor: Some("c1".into()),
            changes: vec![
                change("bk-1", 1, Some(json!({"fee": 1}))),
                change("bk-2", 1, None),
            ],
        }));

        let error = client.run_cycle().await.unwrap_err();
        assert!(!error.is_retriable());
        assert_eq!(client.state(), SyncState::Error);
        assert_eq!(client.cursor().await.unwrap(), None);
        assert!(client.cached(EntityKind::Booking, "bk-1").await.unwrap().is_none());

        client.transport().script_pull(Ok(PullResponse {
            cursor: Some("c1".into()),
            changes: vec![change("bk-1", 1, Some(json!({"fee": 1})))],
        }));
        client.run_cycle().await.unwrap();
        assert_eq!(client.cursor().await.unwrap().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_missing_cursor_keeps_previous() {
        let client = setup();
        client.transport().script_pull(Ok(PullResponse {
            cursor: Some("c1".into()),
            changes: Vec::new(),
        }));
        client.run_cycle().await.unwrap();

        client.transport().script_pull(Ok(PullResponse::default()));
        client.run_cycle().await.unwrap();
        assert_eq!(client.cursor().await.unwrap().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let gate = Arc::new(PushGate::default());
        let transport = ScriptedTransport {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedTransport::default()
        };
        let client = client_with(transport, SyncOptions::default());
        client
            .enqueue(update("bk-1", "2026-03-10T18:00:00Z", json!({"fee": 1})))
            .await
            .unwrap();

        let (first, second) = tokio::join!(client.run_cycle(), async {
            gate.entered.notified().await;
            let outcome = client.run_cycle().await;
            gate.release.notify_one();
            outcome
        });

        assert_eq!(second.unwrap(), CycleOutcome::Coalesced);
        let report = completed(first.unwrap());
        assert_eq!(report.passes, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(client.transport().pushes().len(), 1);
        assert_eq!(client.transport().pulls().len(), 2);
    }

    #[tokio::test]
    async fn test_state_is_observable() {
        let client = setup();
        let receiver = client.subscribe();
        assert_eq!(*receiver.borrow(), SyncState::Offline);

        client.run_cycle().await.unwrap();
        assert_eq!(*receiver.borrow(), SyncState::Synced);
    }

    async fn park(client: &SyncClient<ScriptedTransport>, op: &ClientOperation, server: VersionedRecord) {
        client.enqueue(op.clone()).await.unwrap();
        client.transport().script_push(Ok(PushResponse {
            conflicts: vec![version_conflict(op, server)],
            ..PushResponse::default()
        }));
        client.run_cycle().await.unwrap();
        assert_eq!(client.conflict_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_rebases_newer_client_operation() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:01Z", json!({"fee": 750}));
        park(
            &client,
            &op,
            VersionedRecord::new("bk-1", 5, "2026-03-10T18:00:00Z", json!({"fee": 500})),
        )
        .await;

        let summary = client
            .reconcile_conflicts(ResolutionStrategy::LastWriteWins)
            .await
            .unwrap();
        assert_eq!(summary.client_won, 1);
        assert_eq!(client.conflict_count().await.unwrap(), 0);

        let pending = client.pending(10).await.unwrap();
        assert_eq!(pending[0].operation.base_version, Some(5));
        assert_eq!(pending[0].operation.payload, Some(json!({"fee": 750})));

        client.run_cycle().await.unwrap();
        assert_eq!(client.transport().pushes().len(), 2);
        assert_eq!(client.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_drops_older_client_operation() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T17:00:00Z", json!({"fee": 750}));
        park(
            &client,
            &op,
            VersionedRecord::new("bk-1", 5, "2026-03-10T18:00:00Z", json!({"fee": 500})),
        )
        .await;

        let summary = client.reconcile_conflicts(ResolutionStrategy::default()).await.unwrap();
        assert_eq!(summary.server_won, 1);
        assert_eq!(client.pending_count().await.unwrap(), 0);

        let cached = client.cached(EntityKind::Booking, "bk-1").await.unwrap().unwrap();
        assert_eq!(cached.version, 5);
        assert_eq!(cached.data, json!({"fee": 500}));
        assert!(!cached.is_local);

        let history = client.list_conflicts(10).await.unwrap();
        assert_eq!(history[0].resolution.as_deref(), Some("server-newer"));
    }

    #[tokio::test]
    async fn test_manual_strategy_leaves_conflicts_open() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:01Z", json!({"fee": 750}));
        park(
            &client,
            &op,
            VersionedRecord::new("bk-1", 5, "2026-03-10T18:00:00Z", json!({"fee": 500})),
        )
        .await;

        let summary = client.reconcile_conflicts(ResolutionStrategy::Manual).await.unwrap();
        assert_eq!(summary.needs_manual, 1);
        assert_eq!(client.conflict_count().await.unwrap(), 1);
        assert_eq!(client.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_manual_resolution_keeps_server_copy() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:01Z", json!({"fee": 750}));
        park(
            &client,
            &op,
            VersionedRecord::new("bk-1", 5, "2026-03-10T18:00:00Z", json!({"fee": 500})),
        )
        .await;
        let conflict_id = client.list_conflicts(1).await.unwrap()[0].id;

        client.resolve_conflict_manually(conflict_id, false).await.unwrap();
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert_eq!(client.conflict_count().await.unwrap(), 0);

        let error = client.resolve_conflict_manually(conflict_id, true).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(matches!(
            client.resolve_conflict_manually(9999, true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_business_rule_conflict_needs_manual() {
        let client = setup();
        let op = update("bk-1", "2026-03-10T18:00:01Z", json!({"fee": 750}));
        client.enqueue(op.clone()).await.unwrap();
        client.transport().script_push(Ok(PushResponse {
            conflicts: vec![ConflictRecord {
                kind: ConflictKind::BusinessRule,
                server_record: None,
                message: Some("member already booked".into()),
                ..version_conflict(
                    &op,
                    VersionedRecord::new("bk-1", 1, "2026-03-10T18:00:00Z", json!({})),
                )
            }],
            ..PushResponse::default()
        }));
        client.run_cycle().await.unwrap();

        let summary = client.reconcile_conflicts(ResolutionStrategy::default()).await.unwrap();
        assert_eq!(summary.needs_manual, 1);
        assert_eq!(summary.client_won + summary.server_won, 0);
    }
}
