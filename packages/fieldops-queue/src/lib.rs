//! The durable call queue and receipt store: the boundary between the
//! planner (producer) and the executor worker (consumer). Two ports —
//! `CallQueue` and `ReceiptStore` — are defined as async traits so the
//! worker and planner are storage-agnostic; `memory` backs tests, `postgres`
//! backs production, both satisfying identical contracts.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use fieldops_core::{Call, CallStatus, Receipt, Run};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("call {0} not found")]
    CallNotFound(Uuid),
    #[error("datastore error: {0}")]
    Datastore(#[from] sqlx::Error),
    #[error("other: {0}")]
    Other(String),
}

/// Outcome of `ReceiptStore::put`: distinguishes "I wrote a new receipt"
/// from "one already existed for this call" so callers (the executor) can
/// decide whether to re-emit the prior outcome instead of treating the
/// conflict as an error.
#[derive(Debug, Clone)]
pub enum PutReceipt {
    Created(Receipt),
    AlreadyExists(Receipt),
}

impl PutReceipt {
    pub fn receipt(&self) -> &Receipt {
        match self {
            Self::Created(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[async_trait]
pub trait CallQueue: Send + Sync {
    /// Insert a new call in `queued` status. Returns its id.
    async fn enqueue(&self, call: Call) -> Result<Uuid, QueueError>;

    /// Atomically claim the oldest eligible call (`queued`, or `claimed`/
    /// `running` with an expired lease) for `worker_id`. Returns `None` when
    /// nothing is eligible; never blocks waiting for work.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Call>, QueueError>;

    /// Move a claimed call into `running`.
    async fn mark_running(&self, call_id: Uuid) -> Result<(), QueueError>;

    /// Move a call into one of the terminal statuses, recording an error
    /// payload for `Failed`.
    async fn mark_terminal(
        &self,
        call_id: Uuid,
        status: CallStatus,
        error: Option<serde_json::Value>,
    ) -> Result<(), QueueError>;

    /// Extend a held lease by touching `updated_at`; called periodically by
    /// the worker's heartbeat task while a handler is still running.
    async fn heartbeat(&self, call_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    async fn get(&self, call_id: Uuid) -> Result<Option<Call>, QueueError>;

    async fn get_many(&self, call_ids: &[Uuid]) -> Result<Vec<Call>, QueueError>;

    /// Calls currently sitting in a terminal status, most recently updated
    /// first, capped at `limit`. Used by the sweeper to find terminal calls
    /// that never got a receipt written (§4.3.h).
    async fn list_terminal(&self, limit: i64) -> Result<Vec<Call>, QueueError>;

    /// Sweep: re-queue `claimed`/`running` rows whose lease (time since
    /// `updated_at`) exceeds `lease_ttl`, incrementing `requeue_count`.
    /// Calls whose `requeue_count` would exceed `max_requeues` are instead
    /// terminated `failed` with `lease_exhausted` and excluded from the
    /// returned re-queued id list.
    async fn sweep_expired_leases(
        &self,
        lease_ttl: Duration,
        max_requeues: u32,
    ) -> Result<Vec<Uuid>, QueueError>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Insert a receipt. A unique constraint on `call_id` means a second
    /// insert for the same call never creates a duplicate row; the existing
    /// receipt is returned instead (§4.2).
    async fn put(&self, receipt: Receipt) -> Result<PutReceipt, QueueError>;

    async fn get_by_call_id(&self, call_id: Uuid) -> Result<Option<Receipt>, QueueError>;

    async fn get_many_by_call_id(&self, call_ids: &[Uuid]) -> Result<Vec<Receipt>, QueueError>;

    /// Keyed-idempotency lookup: the most recent succeeded receipt for this
    /// `(tool_name, key_field, key_value)` triple, if any.
    async fn find_by_key(
        &self,
        tool_name: &str,
        key_field: &str,
        key_value: &str,
    ) -> Result<Option<Receipt>, QueueError>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Receipt>, QueueError>;
}

/// The Planner's own correlation table (§3: "the Planner owns run rows").
/// A `Run` is written once, after `Planner::run` has finished compiling,
/// enqueueing, and (for `enqueue_and_wait`) collecting receipts — it is
/// never updated in place.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn put(&self, run: Run) -> Result<(), QueueError>;

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, QueueError>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Run>, QueueError>;
}
