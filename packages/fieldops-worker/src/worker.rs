//! The executor worker main loop: claim → idempotency probe → validate →
//! dispatch → time-box → classify → write receipt + transition (§4.3).

use std::sync::Arc;
use std::time::Duration;

use fieldops_core::{
    error_codes, Call, CallStatus, Contract, DbAction, DbWrite, Effects, IdempotencyEffect,
    IdempotencyMode, Outcome, Receipt, ReceiptStatus,
};
use fieldops_queue::{CallQueue, PutReceipt, QueueError, ReceiptStore};
use fieldops_registry::Registry;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::DomainDb;
use crate::handler::{HandlerContext, HandlerRegistry};

pub struct Worker {
    config: WorkerConfig,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    queue: Arc<dyn CallQueue>,
    receipts: Arc<dyn ReceiptStore>,
    db: DomainDb,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<Registry>,
        handlers: Arc<HandlerRegistry>,
        queue: Arc<dyn CallQueue>,
        receipts: Arc<dyn ReceiptStore>,
        db: DomainDb,
    ) -> Self {
        Self {
            config,
            registry,
            handlers,
            queue,
            receipts,
            db,
        }
    }

    /// Drive the poll/claim/execute loop until `shutdown` is cancelled.
    /// Backoff starts at `poll_min_interval` and doubles on consecutive
    /// empty polls up to `poll_max_interval`, resetting on any claim
    /// (§4.3.1).
    pub async fn run(self, shutdown: CancellationToken) {
        let mut backoff = self.config.poll_min_interval;
        loop {
            if shutdown.is_cancelled() {
                tracing::info!(worker_id = %self.config.worker_id, "worker stopped accepting new claims");
                return;
            }

            let claimed = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.queue.claim_next(&self.config.worker_id) => {
                    match result {
                        Ok(call) => call,
                        Err(err) => {
                            tracing::warn!(error = %err, "claim_next failed");
                            None
                        }
                    }
                }
            };

            match claimed {
                Some(call) => {
                    backoff = self.config.poll_min_interval;
                    self.execute(call).await;
                }
                None => {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.config.poll_max_interval);
                }
            }
        }
    }

    /// Execute a single claimed call end to end: exactly one receipt is
    /// written and the call reaches a terminal status before returning.
    async fn execute(&self, call: Call) {
        let span = tracing::info_span!(
            "execute_call",
            call_id = %call.id,
            tool_name = %call.tool_name,
            worker_id = %self.config.worker_id,
        );
        let _enter = span.enter();
        tracing::info!("claimed call");

        // a. Registry lookup.
        let Some(contract) = self.registry.get(&call.tool_name).cloned() else {
            self.fail_fast(&call, error_codes::UNKNOWN_TOOL, "tool not found in registry")
                .await;
            return;
        };
        let contract = Arc::new(contract);

        // b. Idempotency probe.
        match contract.idempotency.mode {
            IdempotencyMode::None => {}
            IdempotencyMode::SafeRetry => {
                if let Some(existing) = self.prior_receipt(&call).await {
                    self.reemit(&call, existing).await;
                    return;
                }
            }
            IdempotencyMode::Keyed => {
                let Some(key_field) = contract.key_field() else {
                    self.fail_fast(
                        &call,
                        error_codes::VALIDATION_ERROR,
                        "keyed tool has no key_field declared",
                    )
                    .await;
                    return;
                };
                let key_value = call
                    .input
                    .get(key_field)
                    .and_then(|v| v.as_str())
                    .filter(|v| !v.is_empty());
                let Some(key_value) = key_value else {
                    self.fail_fast(
                        &call,
                        error_codes::VALIDATION_ERROR,
                        &format!("missing or empty required idempotency key field {key_field:?}"),
                    )
                    .await;
                    return;
                };
                match self
                    .receipts
                    .find_by_key(&call.tool_name, key_field, key_value)
                    .await
                {
                    Ok(Some(hit)) => {
                        self.record_keyed_hit(&call, hit).await;
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "keyed idempotency lookup failed, proceeding to execute");
                    }
                }
            }
        }

        // c. Input validation.
        if let Err(err) = self.registry.validate_input(&contract, &call.input) {
            self.fail_fast(
                &call,
                error_codes::VALIDATION_ERROR,
                &format!("{}: {}", err.path, err.message),
            )
            .await;
            return;
        }

        // d. Handler dispatch.
        let Some(handler) = self.handlers.get(&call.tool_name) else {
            self.fail_fast(
                &call,
                error_codes::UNKNOWN_TOOL,
                &format!("no handler implementation registered for {}", call.tool_name),
            )
            .await;
            return;
        };

        if let Err(err) = self.queue.mark_running(call.id).await {
            tracing::warn!(error = %err, "failed to mark call running, continuing anyway");
        }

        // e. Timed invocation.
        let timeout = Duration::from_millis(contract.timeout_ms as u64);
        let ctx = HandlerContext {
            call_id: call.id,
            worker_id: self.config.worker_id.clone(),
            contract: contract.clone(),
            timeout,
            db: self.db.clone(),
        };
        let invocation = tokio::spawn({
            let handler = handler.clone();
            let input = call.input.clone();
            async move { handler.invoke(input, ctx).await }
        });
        let abort_handle = invocation.abort_handle();

        let outcome = match tokio::time::timeout(
            timeout,
            self.run_with_heartbeat(call.id, invocation),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Outcome::failed(
                error_codes::EXECUTION_ERROR,
                format!("handler task panicked: {join_err}"),
            ),
            Err(_elapsed) => {
                // The deadline is enforced here; the handler task itself is
                // aborted rather than left to run past its contract timeout.
                abort_handle.abort();
                Outcome::failed(
                    error_codes::TIMEOUT,
                    format!("handler exceeded {}ms deadline", contract.timeout_ms),
                )
            }
        };

        // f. + g. Outcome classification and output validation.
        self.finish(&call, &contract, outcome).await;
    }

    /// Await the handler's task while periodically touching `updated_at` on
    /// the claimed call row, so the lease stays fresh for the entire
    /// `timeout_ms` window rather than only at `mark_running` time. Without
    /// this, a handler running longer than the sweeper's `lease_ttl` would
    /// have its still-executing call swept and re-claimed by another worker
    /// (§4.2, §5's "no other worker may transition it while the lease is
    /// fresh"). The caller wraps this in the overall `timeout_ms` deadline.
    async fn run_with_heartbeat(
        &self,
        call_id: Uuid,
        invocation: tokio::task::JoinHandle<Outcome>,
    ) -> Result<Outcome, tokio::task::JoinError> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; mark_running just refreshed updated_at
        tokio::pin!(invocation);
        loop {
            tokio::select! {
                result = &mut invocation => return result,
                _ = ticker.tick() => {
                    if let Err(err) = self.queue.heartbeat(call_id, &self.config.worker_id).await {
                        tracing::warn!(call_id = %call_id, error = %err, "heartbeat failed, lease may go stale");
                    }
                }
            }
        }
    }

    async fn finish(&self, call: &Call, contract: &Contract, outcome: Outcome) {
        let (status, result, mut effects) = match outcome {
            Outcome::Succeeded { result, effects } => {
                if let Err(err) = self.registry.validate_output(contract, &result) {
                    tracing::warn!(
                        call_id = %call.id,
                        path = %err.path,
                        message = %err.message,
                        "handler output failed output schema validation"
                    );
                    if self.config.strict_output_validation {
                        let failure = serde_json::json!({
                            "error": {
                                "code": error_codes::OUTPUT_VALIDATION_ERROR,
                                "message": format!("{}: {}", err.path, err.message),
                                "details": null,
                            }
                        });
                        (ReceiptStatus::Failed, failure, Effects::default())
                    } else {
                        (ReceiptStatus::Succeeded, result, effects)
                    }
                } else {
                    (ReceiptStatus::Succeeded, result, effects)
                }
            }
            Outcome::NotConfigured {
                reason,
                required_env,
                next_steps,
            } => (
                ReceiptStatus::NotConfigured,
                serde_json::json!({
                    "reason": reason,
                    "required_env": required_env,
                    "next_steps": next_steps,
                }),
                Effects::default(),
            ),
            Outcome::Failed {
                code,
                message,
                details,
            } => (
                ReceiptStatus::Failed,
                serde_json::json!({
                    "error": { "code": code, "message": message, "details": details }
                }),
                Effects::default(),
            ),
        };

        if contract.idempotency.mode == IdempotencyMode::Keyed && status == ReceiptStatus::Succeeded
        {
            if effects.idempotency.is_none() {
                let key_field = contract.key_field().map(|s| s.to_string());
                let key_value = key_field
                    .as_deref()
                    .and_then(|f| call.input.get(f))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                effects.idempotency = Some(IdempotencyEffect {
                    mode: IdempotencyMode::Keyed,
                    hit: false,
                    key_field,
                    key_value,
                });
            }
        }

        self.write_receipt_and_transition(call, status, result, effects)
            .await;
    }

    async fn write_receipt_and_transition(
        &self,
        call: &Call,
        status: ReceiptStatus,
        result: serde_json::Value,
        effects: Effects,
    ) {
        let receipt = Receipt::builder()
            .call_id(call.id)
            .tool_name(call.tool_name.clone())
            .status(status)
            .result(result)
            .effects(effects)
            .build();

        match self.receipts.put(receipt).await {
            Ok(PutReceipt::Created(receipt)) => {
                tracing::info!(status = %receipt.status.as_str(), "wrote receipt");
            }
            Ok(PutReceipt::AlreadyExists(existing)) => {
                tracing::info!(status = %existing.status.as_str(), "receipt already existed for call, reusing");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to write receipt; leaving call for the sweeper");
                return;
            }
        }

        let call_status = match status {
            ReceiptStatus::Succeeded => CallStatus::Succeeded,
            ReceiptStatus::Failed => CallStatus::Failed,
            ReceiptStatus::NotConfigured => CallStatus::NotConfigured,
        };
        if let Err(err) = self.queue.mark_terminal(call.id, call_status, None).await {
            tracing::error!(error = %err, "failed to transition call to terminal status after receipt write");
        }
    }

    async fn fail_fast(&self, call: &Call, code: &str, message: &str) {
        tracing::warn!(call_id = %call.id, code, message, "fast-rejecting call before dispatch");
        let result = serde_json::json!({
            "error": { "code": code, "message": message, "details": null }
        });
        self.write_receipt_and_transition(call, ReceiptStatus::Failed, result, Effects::default())
            .await;
    }

    async fn prior_receipt(&self, call: &Call) -> Option<Receipt> {
        match self.receipts.get_by_call_id(call.id).await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(error = %err, "safe-retry receipt lookup failed");
                None
            }
        }
    }

    /// `safe-retry`: an existing receipt for this exact call already stands;
    /// do not write a second one, just bring the call row to agreement with
    /// it (§4.3.b, terminal monotonicity in §8).
    async fn reemit(&self, call: &Call, existing: Receipt) {
        tracing::info!(call_id = %call.id, status = %existing.status.as_str(), "safe-retry: reusing existing receipt");
        let call_status = match existing.status {
            ReceiptStatus::Succeeded => CallStatus::Succeeded,
            ReceiptStatus::Failed => CallStatus::Failed,
            ReceiptStatus::NotConfigured => CallStatus::NotConfigured,
        };
        if let Err(err) = self.queue.mark_terminal(call.id, call_status, None).await {
            tracing::warn!(error = %err, "failed to align call status with pre-existing receipt");
        }
    }

    /// `keyed` idempotency hit: the call's own receipt is still written (one
    /// receipt per call id always holds), referencing the prior winner's
    /// result with `idempotency.hit=true` (§4.3.b).
    async fn record_keyed_hit(&self, call: &Call, winner: Receipt) {
        tracing::info!(call_id = %call.id, winning_call_id = %winner.call_id, "keyed idempotency hit");
        let mut effects = winner.effects.clone();
        effects.db_writes = Vec::new();
        let key_field = winner
            .effects
            .idempotency
            .as_ref()
            .and_then(|i| i.key_field.clone());
        let key_value = winner
            .effects
            .idempotency
            .as_ref()
            .and_then(|i| i.key_value.clone());
        effects.idempotency = Some(IdempotencyEffect {
            mode: IdempotencyMode::Keyed,
            hit: true,
            key_field,
            key_value,
        });
        self.write_receipt_and_transition(call, ReceiptStatus::Succeeded, winner.result.clone(), effects)
            .await;
    }
}

/// Helper for handlers that perform a single insert: builds the normalized
/// `effects.db_writes` entry described in §3.
pub fn insert_effect(table: impl Into<String>, id: impl Into<String>) -> DbWrite {
    DbWrite {
        table: table.into(),
        action: DbAction::Insert,
        id: id.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::{Idempotency, Schema, SchemaType};
    use fieldops_queue::memory::{InMemoryCallQueue, InMemoryReceiptStore};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn object_schema(required: &[&str], properties: BTreeMap<String, Schema>) -> Schema {
        Schema {
            schema_type: SchemaType::Object,
            description: None,
            properties: Some(properties),
            required: required.iter().map(|s| s.to_string()).collect(),
            items: None,
            enum_values: None,
            pattern: None,
            format: None,
            additional_properties: Some(false),
        }
    }

    fn string_schema() -> Schema {
        Schema {
            schema_type: SchemaType::String,
            description: None,
            properties: None,
            required: vec![],
            items: None,
            enum_values: None,
            pattern: None,
            format: None,
            additional_properties: None,
        }
    }

    fn leads_create_contract() -> Contract {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), string_schema());
        props.insert("phone".to_string(), string_schema());
        Contract {
            name: "leads.create".into(),
            description: "Create a lead".into(),
            input_schema: object_schema(&["name", "phone"], props),
            output_schema: object_schema(&[], BTreeMap::new()),
            permissions: vec![],
            idempotency: Idempotency {
                mode: IdempotencyMode::Keyed,
                key_field: Some("phone".into()),
            },
            timeout_ms: 5000,
            receipt_fields: vec![],
        }
    }

    fn harness(
        contract: Contract,
    ) -> (
        Worker,
        Arc<InMemoryCallQueue>,
        Arc<InMemoryReceiptStore>,
        Arc<HandlerRegistry>,
    ) {
        let registry = Arc::new(Registry::from_contracts(vec![contract]).unwrap());
        let queue = Arc::new(InMemoryCallQueue::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "leads",
            "create",
            Arc::new(|input: serde_json::Value, _ctx: HandlerContext| async move {
                let phone = input["phone"].as_str().unwrap().to_string();
                let lead_id = uuid::Uuid::new_v4().to_string();
                Outcome::Succeeded {
                    result: serde_json::json!({"lead_id": lead_id}),
                    effects: Effects {
                        db_writes: vec![insert_effect("leads", phone)],
                        ..Effects::default()
                    },
                }
            }),
        );
        let handlers = Arc::new(handlers);
        let worker = Worker::new(
            WorkerConfig::new("worker-test"),
            registry,
            handlers.clone(),
            queue.clone(),
            receipts.clone(),
            test_db(),
        );
        (worker, queue, receipts, handlers)
    }

    /// A lazily-connecting pool never touches the network unless a query is
    /// actually run, which none of these unit tests do.
    fn test_db() -> DomainDb {
        DomainDb::new(
            sqlx::postgres::PgPoolOptions::new()
                .connect_lazy("postgres://localhost/fieldops_test")
                .expect("lazy pool construction never fails"),
        )
    }

    #[tokio::test]
    async fn unknown_tool_fails_fast_with_one_receipt() {
        let (worker, queue, receipts, _handlers) = harness(leads_create_contract());
        let call = Call::new("nonexistent.fake", serde_json::json!({}));
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();
        worker.execute(call).await;

        let receipt = receipts.get_by_call_id(id).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.result["error"]["code"], "unknown_tool");
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn validation_failure_fails_fast_before_dispatch() {
        let (worker, queue, receipts, _handlers) = harness(leads_create_contract());
        let call = Call::new("leads.create", serde_json::json!({"name": "Sarah M"}));
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();
        worker.execute(call).await;

        let receipt = receipts.get_by_call_id(id).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.result["error"]["code"], "validation_error");
        assert!(receipt.result["error"]["message"]
            .as_str()
            .unwrap()
            .contains("phone"));
    }

    #[tokio::test]
    async fn happy_path_create_emits_keyed_idempotency_effect() {
        let (worker, queue, receipts, _handlers) = harness(leads_create_contract());
        let call = Call::new(
            "leads.create",
            serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
        );
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();
        worker.execute(call).await;

        let receipt = receipts.get_by_call_id(id).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Succeeded);
        assert!(receipt.result["lead_id"].is_string());
        let idem = receipt.effects.idempotency.unwrap();
        assert!(!idem.hit);
        assert_eq!(idem.key_field.as_deref(), Some("phone"));
        assert_eq!(idem.key_value.as_deref(), Some("+61400000001"));
        assert_eq!(receipt.effects.db_writes.len(), 1);
    }

    #[tokio::test]
    async fn second_call_with_same_key_hits_idempotency() {
        let (worker, queue, receipts, _handlers) = harness(leads_create_contract());
        let input = serde_json::json!({"name": "Sarah M", "phone": "+61400000001"});

        let first = Call::new("leads.create", input.clone());
        let first_id = first.id;
        queue.enqueue(first.clone()).await.unwrap();
        worker.execute(first).await;
        let first_receipt = receipts.get_by_call_id(first_id).await.unwrap().unwrap();

        let second = Call::new("leads.create", input);
        let second_id = second.id;
        queue.enqueue(second.clone()).await.unwrap();
        worker.execute(second).await;
        let second_receipt = receipts.get_by_call_id(second_id).await.unwrap().unwrap();

        assert_eq!(second_receipt.result["lead_id"], first_receipt.result["lead_id"]);
        assert!(second_receipt.effects.idempotency.unwrap().hit);
        assert!(second_receipt.effects.db_writes.is_empty());
    }

    #[tokio::test]
    async fn handler_timeout_produces_timeout_receipt() {
        let mut contract = leads_create_contract();
        contract.idempotency = Idempotency::none();
        contract.timeout_ms = 1000;
        let registry = Arc::new(Registry::from_contracts(vec![contract]).unwrap());
        let queue = Arc::new(InMemoryCallQueue::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "leads",
            "create",
            Arc::new(|_input: serde_json::Value, _ctx: HandlerContext| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Outcome::succeeded(serde_json::json!({}))
            }),
        );
        let worker = Worker::new(
            WorkerConfig::new("worker-test"),
            registry,
            Arc::new(handlers),
            queue.clone(),
            receipts.clone(),
            test_db(),
        );
        let call = Call::new(
            "leads.create",
            serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
        );
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();
        worker.execute(call).await;

        let receipt = receipts.get_by_call_id(id).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.result["error"]["code"], "timeout");
    }

    /// Simulates a worker crashing between writing a receipt and nothing
    /// else needing to happen: a second worker picks the same `call_id` back
    /// up (as the sweeper would requeue it) and, under `safe-retry`, reuses
    /// the standing receipt instead of invoking the handler again.
    #[tokio::test]
    async fn safe_retry_reuses_prior_receipt_after_simulated_crash() {
        let mut contract = leads_create_contract();
        contract.idempotency = Idempotency {
            mode: IdempotencyMode::SafeRetry,
            key_field: None,
        };
        let registry = Arc::new(Registry::from_contracts(vec![contract]).unwrap());
        let queue = Arc::new(InMemoryCallQueue::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "leads",
            "create",
            Arc::new(|_input: serde_json::Value, _ctx: HandlerContext| async move {
                panic!("handler must not run once a prior receipt stands for this call");
            }),
        );
        let worker = Worker::new(
            WorkerConfig::new("worker-test"),
            registry,
            Arc::new(handlers),
            queue.clone(),
            receipts.clone(),
            test_db(),
        );

        let call = Call::new(
            "leads.create",
            serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
        );
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();

        // The crashed attempt got as far as writing a receipt before the
        // worker process died, leaving the call row behind in `claimed`.
        let crashed_receipt = Receipt::builder()
            .call_id(id)
            .tool_name("leads.create")
            .status(ReceiptStatus::Succeeded)
            .result(serde_json::json!({"lead_id": "11111111-1111-1111-1111-111111111111"}))
            .build();
        receipts.put(crashed_receipt).await.unwrap();

        // A restarted worker reclaims the call and re-executes the sequence.
        worker.execute(call).await;

        let final_receipts = receipts.get_many_by_call_id(&[id]).await.unwrap();
        assert_eq!(final_receipts.len(), 1);
        assert_eq!(final_receipts[0].result["lead_id"], "11111111-1111-1111-1111-111111111111");
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, CallStatus::Succeeded);
    }

    /// A `CallQueue` wrapper that counts `heartbeat` calls, so tests can
    /// observe that the worker actually touches the lease while a handler
    /// is still in flight instead of only at `mark_running`/terminal time.
    struct HeartbeatCountingQueue {
        inner: Arc<InMemoryCallQueue>,
        heartbeats: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CallQueue for HeartbeatCountingQueue {
        async fn enqueue(&self, call: Call) -> Result<Uuid, QueueError> {
            self.inner.enqueue(call).await
        }
        async fn claim_next(&self, worker_id: &str) -> Result<Option<Call>, QueueError> {
            self.inner.claim_next(worker_id).await
        }
        async fn mark_running(&self, call_id: Uuid) -> Result<(), QueueError> {
            self.inner.mark_running(call_id).await
        }
        async fn mark_terminal(
            &self,
            call_id: Uuid,
            status: CallStatus,
            error: Option<serde_json::Value>,
        ) -> Result<(), QueueError> {
            self.inner.mark_terminal(call_id, status, error).await
        }
        async fn heartbeat(&self, call_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
            self.heartbeats
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.heartbeat(call_id, worker_id).await
        }
        async fn get(&self, call_id: Uuid) -> Result<Option<Call>, QueueError> {
            self.inner.get(call_id).await
        }
        async fn get_many(&self, call_ids: &[Uuid]) -> Result<Vec<Call>, QueueError> {
            self.inner.get_many(call_ids).await
        }
        async fn list_terminal(&self, limit: i64) -> Result<Vec<Call>, QueueError> {
            self.inner.list_terminal(limit).await
        }
        async fn sweep_expired_leases(
            &self,
            lease_ttl: Duration,
            max_requeues: u32,
        ) -> Result<Vec<Uuid>, QueueError> {
            self.inner.sweep_expired_leases(lease_ttl, max_requeues).await
        }
    }

    /// A handler that outlives one heartbeat tick must keep the lease fresh:
    /// the sweeper relies on `updated_at` staying recent for the whole
    /// `timeout_ms` window, not just at claim time (§4.2, §5).
    #[tokio::test]
    async fn long_running_handler_is_heartbeated_while_in_flight() {
        let mut contract = leads_create_contract();
        contract.idempotency = Idempotency::none();
        contract.timeout_ms = 5000;
        let registry = Arc::new(Registry::from_contracts(vec![contract]).unwrap());
        let queue = Arc::new(HeartbeatCountingQueue {
            inner: Arc::new(InMemoryCallQueue::new()),
            heartbeats: std::sync::atomic::AtomicUsize::new(0),
        });
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "leads",
            "create",
            Arc::new(|_input: serde_json::Value, _ctx: HandlerContext| async move {
                tokio::time::sleep(Duration::from_millis(260)).await;
                Outcome::succeeded(serde_json::json!({}))
            }),
        );
        let mut config = WorkerConfig::new("worker-test");
        config.heartbeat_interval = Duration::from_millis(50);
        let worker = Worker::new(
            config,
            registry,
            Arc::new(handlers),
            queue.clone(),
            receipts.clone(),
            test_db(),
        );
        let call = Call::new(
            "leads.create",
            serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
        );
        let id = call.id;
        queue.enqueue(call.clone()).await.unwrap();
        worker.execute(call).await;

        let receipt = receipts.get_by_call_id(id).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Succeeded);
        assert!(
            queue.heartbeats.load(std::sync::atomic::Ordering::SeqCst) >= 2,
            "expected at least two heartbeats while the 260ms handler ran with a 50ms interval"
        );
    }
}
