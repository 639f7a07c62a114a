//! Background task that reclaims stuck leases and reconciles missing
//! receipts (§4.2, §4.3.h). Runs on its own interval, independent of any
//! worker's poll loop, so a sweep still happens even if every worker is
//! wedged.

use std::sync::Arc;
use std::time::Duration;

use fieldops_core::{error_codes, CallStatus, Receipt, ReceiptStatus};
use fieldops_queue::{CallQueue, ReceiptStore};
use tokio_util::sync::CancellationToken;

pub struct Sweeper {
    queue: Arc<dyn CallQueue>,
    receipts: Arc<dyn ReceiptStore>,
    interval: Duration,
    lease_ttl: Duration,
    max_requeues: u32,
}

impl Sweeper {
    pub fn new(
        queue: Arc<dyn CallQueue>,
        receipts: Arc<dyn ReceiptStore>,
        interval: Duration,
        lease_ttl: Duration,
        max_requeues: u32,
    ) -> Self {
        Self {
            queue,
            receipts,
            interval,
            lease_ttl,
            max_requeues,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        // Sweeper errors are logged and retried; they never
                        // abort the process (§7).
                        tracing::warn!(error = %err, "sweep cycle failed");
                    }
                }
            }
        }
    }

    async fn sweep_once(&self) -> Result<(), fieldops_queue::QueueError> {
        let requeued = self
            .queue
            .sweep_expired_leases(self.lease_ttl, self.max_requeues)
            .await?;
        if !requeued.is_empty() {
            tracing::info!(count = requeued.len(), "sweeper requeued stuck leases");
        }
        self.reconcile_missing_receipts().await?;
        Ok(())
    }

    /// If a call is terminal but no receipt exists for it, synthesize a
    /// `failed`/`missing_receipt` receipt so the receipt-uniqueness and
    /// no-lost-calls invariants (§8) hold even across a crash between the
    /// call update and the receipt write.
    async fn reconcile_missing_receipts(&self) -> Result<(), fieldops_queue::QueueError> {
        let terminal = self.queue.list_terminal(1000).await?;
        let recent = self.receipts.list_recent(1000).await?;
        let with_receipt: std::collections::HashSet<_> =
            recent.iter().map(|r| r.call_id).collect();

        for call in terminal.into_iter().filter(|c| !with_receipt.contains(&c.id)) {
            let synthetic = Receipt::builder()
                .call_id(call.id)
                .tool_name(call.tool_name.clone())
                .status(ReceiptStatus::Failed)
                .result(serde_json::json!({
                    "error": {
                        "code": error_codes::MISSING_RECEIPT,
                        "message": "call reached a terminal status with no corresponding receipt",
                        "details": null,
                    }
                }))
                .build();
            let put = self.receipts.put(synthetic).await?;
            if put.was_created() {
                tracing::warn!(call_id = %call.id, "synthesized missing_receipt for orphaned terminal call");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::Call;
    use fieldops_queue::memory::{InMemoryCallQueue, InMemoryReceiptStore};

    #[tokio::test]
    async fn sweep_requeues_and_reports_no_error_on_idle_queue() {
        let queue = Arc::new(InMemoryCallQueue::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let sweeper = Sweeper::new(
            queue.clone(),
            receipts.clone(),
            Duration::from_millis(10),
            Duration::from_millis(0),
            3,
        );
        let call = Call::new("leads.create", serde_json::json!({}));
        let id = call.id;
        queue.enqueue(call).await.unwrap();
        queue.claim_next("worker-1").await.unwrap();

        sweeper.sweep_once().await.unwrap();
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            CallStatus::Queued
        );
    }
}
