//! In-memory `CallQueue`/`ReceiptStore` used by unit tests, the property
//! suite, and the CLI's offline `plan`-only path. Mirrors the semantics of
//! the Postgres port exactly (same claim ordering, same lease-sweep rules)
//! so tests written against it generalize.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fieldops_core::{Call, CallStatus, Receipt, ReceiptStatus, Run};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{CallQueue, PutReceipt, QueueError, ReceiptStore, RunStore};

#[derive(Default)]
pub struct InMemoryCallQueue {
    calls: Mutex<HashMap<Uuid, Call>>,
}

impl InMemoryCallQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallQueue for InMemoryCallQueue {
    async fn enqueue(&self, call: Call) -> Result<Uuid, QueueError> {
        let id = call.id;
        self.calls.lock().await.insert(id, call);
        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Call>, QueueError> {
        let mut calls = self.calls.lock().await;
        let candidate = calls
            .values()
            .filter(|c| c.status == CallStatus::Queued)
            .min_by_key(|c| c.created_at)
            .map(|c| c.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let call = calls.get_mut(&id).expect("candidate id must exist");
        call.status = CallStatus::Claimed;
        call.worker_id = Some(worker_id.to_string());
        call.claimed_at = Some(Utc::now());
        call.updated_at = Utc::now();
        Ok(Some(call.clone()))
    }

    async fn mark_running(&self, call_id: Uuid) -> Result<(), QueueError> {
        let mut calls = self.calls.lock().await;
        let call = calls
            .get_mut(&call_id)
            .ok_or(QueueError::CallNotFound(call_id))?;
        call.status = CallStatus::Running;
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_terminal(
        &self,
        call_id: Uuid,
        status: CallStatus,
        error: Option<serde_json::Value>,
    ) -> Result<(), QueueError> {
        if !status.is_terminal() {
            return Err(QueueError::Other(format!(
                "{status} is not a terminal status"
            )));
        }
        let mut calls = self.calls.lock().await;
        let call = calls
            .get_mut(&call_id)
            .ok_or(QueueError::CallNotFound(call_id))?;
        if call.status.is_terminal() {
            // Terminal monotonicity (§8): never re-transition a terminal call.
            return Ok(());
        }
        call.status = status;
        call.error = error;
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn heartbeat(&self, call_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let mut calls = self.calls.lock().await;
        let call = calls
            .get_mut(&call_id)
            .ok_or(QueueError::CallNotFound(call_id))?;
        if call.worker_id.as_deref() != Some(worker_id) {
            return Err(QueueError::Other(format!(
                "call {call_id} is not held by worker {worker_id}"
            )));
        }
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, call_id: Uuid) -> Result<Option<Call>, QueueError> {
        Ok(self.calls.lock().await.get(&call_id).cloned())
    }

    async fn get_many(&self, call_ids: &[Uuid]) -> Result<Vec<Call>, QueueError> {
        let calls = self.calls.lock().await;
        Ok(call_ids.iter().filter_map(|id| calls.get(id).cloned()).collect())
    }

    async fn list_terminal(&self, limit: i64) -> Result<Vec<Call>, QueueError> {
        let calls = self.calls.lock().await;
        let mut terminal: Vec<Call> = calls
            .values()
            .filter(|c| c.status.is_terminal())
            .cloned()
            .collect();
        terminal.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        terminal.truncate(limit.max(0) as usize);
        Ok(terminal)
    }

    async fn sweep_expired_leases(
        &self,
        lease_ttl: Duration,
        max_requeues: u32,
    ) -> Result<Vec<Uuid>, QueueError> {
        let mut calls = self.calls.lock().await;
        let now = Utc::now();
        let mut requeued = Vec::new();
        for call in calls.values_mut() {
            if !matches!(call.status, CallStatus::Claimed | CallStatus::Running) {
                continue;
            }
            let age = now.signed_duration_since(call.updated_at);
            if age.to_std().unwrap_or_default() < lease_ttl {
                continue;
            }
            if call.requeue_count >= max_requeues {
                call.status = CallStatus::Failed;
                call.error = Some(serde_json::json!({
                    "code": fieldops_core::error_codes::LEASE_EXHAUSTED,
                    "message": format!("lease exhausted after {} requeues", call.requeue_count),
                }));
                call.updated_at = now;
                continue;
            }
            call.status = CallStatus::Queued;
            call.worker_id = None;
            call.claimed_at = None;
            call.requeue_count += 1;
            call.updated_at = now;
            requeued.push(call.id);
        }
        Ok(requeued)
    }
}

#[derive(Default)]
pub struct InMemoryReceiptStore {
    receipts: Mutex<HashMap<Uuid, Receipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn put(&self, receipt: Receipt) -> Result<PutReceipt, QueueError> {
        let mut receipts = self.receipts.lock().await;
        if let Some(existing) = receipts.values().find(|r| r.call_id == receipt.call_id) {
            return Ok(PutReceipt::AlreadyExists(existing.clone()));
        }
        let stored = receipt.clone();
        receipts.insert(receipt.id, receipt);
        Ok(PutReceipt::Created(stored))
    }

    async fn get_by_call_id(&self, call_id: Uuid) -> Result<Option<Receipt>, QueueError> {
        Ok(self
            .receipts
            .lock()
            .await
            .values()
            .find(|r| r.call_id == call_id)
            .cloned())
    }

    async fn get_many_by_call_id(&self, call_ids: &[Uuid]) -> Result<Vec<Receipt>, QueueError> {
        let receipts = self.receipts.lock().await;
        Ok(call_ids
            .iter()
            .filter_map(|id| receipts.values().find(|r| r.call_id == *id).cloned())
            .collect())
    }

    async fn find_by_key(
        &self,
        tool_name: &str,
        key_field: &str,
        key_value: &str,
    ) -> Result<Option<Receipt>, QueueError> {
        let receipts = self.receipts.lock().await;
        Ok(receipts
            .values()
            .filter(|r| r.tool_name == tool_name && r.status == ReceiptStatus::Succeeded)
            .filter(|r| {
                r.effects
                    .idempotency
                    .as_ref()
                    .map(|i| {
                        i.key_field.as_deref() == Some(key_field)
                            && i.key_value.as_deref() == Some(key_value)
                    })
                    .unwrap_or(false)
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Receipt>, QueueError> {
        let mut all: Vec<Receipt> = self.receipts.lock().await.values().cloned().collect();
        all.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn put(&self, run: Run) -> Result<(), QueueError> {
        self.runs.lock().await.insert(run.id, run);
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, QueueError> {
        Ok(self.runs.lock().await.get(&run_id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Run>, QueueError> {
        let mut all: Vec<Run> = self.runs.lock().await.values().cloned().collect();
        all.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::Call;

    #[tokio::test]
    async fn claim_next_returns_oldest_queued_call() {
        let queue = InMemoryCallQueue::new();
        let first = Call::new("leads.create", serde_json::json!({}));
        let first_id = first.id;
        queue.enqueue(first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        queue
            .enqueue(Call::new("leads.create", serde_json::json!({})))
            .await
            .unwrap();

        let claimed = queue.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, first_id);
        assert_eq!(claimed.status, CallStatus::Claimed);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn claim_next_is_empty_when_nothing_queued() {
        let queue = InMemoryCallQueue::new();
        assert!(queue.claim_next("worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_calls_never_re_transition() {
        let queue = InMemoryCallQueue::new();
        let call = Call::new("leads.create", serde_json::json!({}));
        let id = call.id;
        queue.enqueue(call).await.unwrap();
        queue.claim_next("worker-1").await.unwrap();
        queue
            .mark_terminal(id, CallStatus::Succeeded, None)
            .await
            .unwrap();
        queue
            .mark_terminal(id, CallStatus::Failed, Some(serde_json::json!({"code": "x"})))
            .await
            .unwrap();
        let call = queue.get(id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Succeeded);
    }

    #[tokio::test]
    async fn receipt_store_enforces_one_receipt_per_call() {
        let store = InMemoryReceiptStore::new();
        let call_id = Uuid::new_v4();
        let r1 = Receipt::builder()
            .call_id(call_id)
            .tool_name("leads.create")
            .status(ReceiptStatus::Succeeded)
            .build();
        let r2 = Receipt::builder()
            .call_id(call_id)
            .tool_name("leads.create")
            .status(ReceiptStatus::Failed)
            .build();
        let first = store.put(r1).await.unwrap();
        assert!(first.was_created());
        let second = store.put(r2).await.unwrap();
        assert!(!second.was_created());
        assert_eq!(second.receipt().status, ReceiptStatus::Succeeded);
    }

    #[tokio::test]
    async fn sweep_requeues_stuck_claims_and_then_exhausts_lease() {
        let queue = InMemoryCallQueue::new();
        let call = Call::new("leads.create", serde_json::json!({}));
        let id = call.id;
        queue.enqueue(call).await.unwrap();
        queue.claim_next("worker-1").await.unwrap();

        // Simulate elapsed time by sweeping with a zero-length lease.
        let requeued = queue
            .sweep_expired_leases(Duration::from_millis(0), 1)
            .await
            .unwrap();
        assert_eq!(requeued, vec![id]);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, CallStatus::Queued);

        queue.claim_next("worker-2").await.unwrap();
        let requeued = queue
            .sweep_expired_leases(Duration::from_millis(0), 1)
            .await
            .unwrap();
        assert!(requeued.is_empty());
        let call = queue.get(id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn run_store_round_trips_and_lists_most_recent_first() {
        let store = InMemoryRunStore::new();
        let first = Run::builder().message("create task: call John").build();
        let first_id = first.id;
        store.put(first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = Run::builder().message("create a lead").build();
        let second_id = second.id;
        store.put(second).await.unwrap();

        let fetched = store.get(first_id).await.unwrap().unwrap();
        assert_eq!(fetched.message, "create task: call John");

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent[0].id, second_id);
        assert_eq!(recent[1].id, first_id);
    }
}
