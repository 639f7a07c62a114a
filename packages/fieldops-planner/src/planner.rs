//! The Planner / Run Coordinator: compiles a structured request into
//! contract-valid calls, enqueues them, optionally waits for receipts, and
//! returns a structured response (§4.4).

use std::sync::Arc;
use std::time::Duration;

use fieldops_core::{Call, PlannedCall, Receipt, Run, RunMode};
use fieldops_queue::{CallQueue, ReceiptStore, RunStore};
use fieldops_registry::Registry;
use serde::Serialize;
use uuid::Uuid;

use crate::rules::{PlannerRequest, RuleSet};

/// Caps and polling parameters a caller may override per request; the
/// defaults match §5/§4.4.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_tool_calls: usize,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            wait_timeout_ms: 30_000,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub message: String,
    pub mode: RunMode,
    pub context: serde_json::Value,
    pub limits: RunLimits,
}

impl RunRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mode: RunMode::default(),
            context: serde_json::json!({}),
            limits: RunLimits::default(),
        }
    }
}

/// The response shape from §4.4: `{ok, run_id, decision,
/// planned_tool_calls, enqueued, receipts, assistant_message,
/// next_actions, errors}`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub ok: bool,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    pub planned_tool_calls: Vec<PlannedCall>,
    pub enqueued: Vec<Uuid>,
    pub receipts: Vec<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    pub next_actions: Vec<String>,
    pub errors: Vec<String>,
}

pub struct Planner {
    rules: RuleSet,
    registry: Arc<Registry>,
    queue: Arc<dyn CallQueue>,
    receipts: Arc<dyn ReceiptStore>,
    runs: Arc<dyn RunStore>,
}

impl Planner {
    pub fn new(
        rules: RuleSet,
        registry: Arc<Registry>,
        queue: Arc<dyn CallQueue>,
        receipts: Arc<dyn ReceiptStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            rules,
            registry,
            queue,
            receipts,
            runs,
        }
    }

    /// Compile, validate, enqueue and (in `enqueue_and_wait` mode) await
    /// receipts for `request`, then persist the correlation row every exit
    /// path produces (§3: "the Planner owns run rows") before returning.
    pub async fn run(&self, request: RunRequest) -> RunResponse {
        let run_id = Uuid::new_v4();
        let response = self.compute(&request, run_id).await;

        let record = to_run_record(&request, &response);
        if let Err(err) = self.runs.put(record).await {
            tracing::warn!(error = %err, run_id = %run_id, "failed to persist run record");
        }

        response
    }

    async fn compute(&self, request: &RunRequest, run_id: Uuid) -> RunResponse {
        if matches!(request.mode, RunMode::Answer) {
            return RunResponse {
                ok: true,
                run_id,
                decision: Some("answer mode: no tool calls compiled".to_string()),
                planned_tool_calls: vec![],
                enqueued: vec![],
                receipts: vec![],
                assistant_message: Some(self.answer(&request.message)),
                next_actions: vec![],
                errors: vec![],
            };
        }

        let planner_req = PlannerRequest::new(request.message.clone(), request.context.clone());
        let Some(rule) = self.rules.find_match(&planner_req.message) else {
            return RunResponse {
                ok: false,
                run_id,
                decision: None,
                planned_tool_calls: vec![],
                enqueued: vec![],
                receipts: vec![],
                assistant_message: None,
                next_actions: vec![],
                errors: vec![format!(
                    "no_matching_rule: no planner rule matched {:?}",
                    request.message
                )],
            };
        };

        let input = (rule.build_input)(&planner_req);
        let planned = vec![PlannedCall {
            tool_name: rule.tool_name.to_string(),
            input,
        }];

        if planned.len() > request.limits.max_tool_calls {
            return RunResponse {
                ok: false,
                run_id,
                decision: Some(format!("matched rule {:?}", rule.name)),
                planned_tool_calls: vec![],
                enqueued: vec![],
                receipts: vec![],
                assistant_message: None,
                next_actions: vec![],
                errors: vec![format!(
                    "max_tool_calls exceeded: {} planned, limit {}",
                    planned.len(),
                    request.limits.max_tool_calls
                )],
            };
        }

        let mut errors = Vec::new();
        for call in &planned {
            match self.registry.get(&call.tool_name) {
                None => errors.push(format!("unknown_tool: {}", call.tool_name)),
                Some(contract) => {
                    if let Err(err) = self.registry.validate_input(contract, &call.input) {
                        errors.push(format!("{}: {}: {}", call.tool_name, err.path, err.message));
                    }
                }
            }
        }

        let decision = Some(format!("matched rule {:?}", rule.name));

        if !errors.is_empty() {
            return RunResponse {
                ok: false,
                run_id,
                decision,
                planned_tool_calls: planned,
                enqueued: vec![],
                receipts: vec![],
                assistant_message: None,
                next_actions: vec![],
                errors,
            };
        }

        if matches!(request.mode, RunMode::Plan) {
            return RunResponse {
                ok: true,
                run_id,
                decision,
                planned_tool_calls: planned,
                enqueued: vec![],
                receipts: vec![],
                assistant_message: None,
                next_actions: vec![],
                errors: vec![],
            };
        }

        let mut enqueued = Vec::with_capacity(planned.len());
        for call in &planned {
            let row = Call::new(call.tool_name.clone(), call.input.clone());
            match self.queue.enqueue(row).await {
                Ok(id) => enqueued.push(id),
                Err(err) => errors.push(format!("enqueue failed for {}: {err}", call.tool_name)),
            }
        }

        if !matches!(request.mode, RunMode::EnqueueAndWait) || enqueued.is_empty() {
            return RunResponse {
                ok: errors.is_empty(),
                run_id,
                decision,
                planned_tool_calls: planned,
                enqueued,
                receipts: vec![],
                assistant_message: None,
                next_actions: vec![],
                errors,
            };
        }

        let (receipts, timed_out) = self
            .wait_for_receipts(&enqueued, &request.limits)
            .await;

        let mut next_actions = Vec::new();
        if !timed_out.is_empty() {
            next_actions.push(format!(
                "timeout_waiting: {} call(s) still pending after {}ms",
                timed_out.len(),
                request.limits.wait_timeout_ms
            ));
        }

        RunResponse {
            ok: errors.is_empty(),
            run_id,
            decision,
            planned_tool_calls: planned,
            enqueued,
            receipts,
            assistant_message: None,
            next_actions,
            errors,
        }
    }

    /// `answer` mode never touches the queue: a canned, structured reply is
    /// all the core substrate promises (the natural-language layer that
    /// would produce a richer answer is out of scope, §1).
    fn answer(&self, message: &str) -> String {
        format!("no action taken for: {message}")
    }

    /// Poll the receipt store for `call_ids` at `poll_interval_ms` until all
    /// are terminal or `wait_timeout_ms` elapses. Returns the receipts
    /// collected so far and the subset of ids still pending at timeout.
    async fn wait_for_receipts(
        &self,
        call_ids: &[Uuid],
        limits: &RunLimits,
    ) -> (Vec<Receipt>, Vec<Uuid>) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(limits.wait_timeout_ms);
        let poll_interval = Duration::from_millis(limits.poll_interval_ms);

        loop {
            let found = match self.receipts.get_many_by_call_id(call_ids).await {
                Ok(receipts) => receipts,
                Err(err) => {
                    tracing::warn!(error = %err, "receipt poll failed, retrying");
                    Vec::new()
                }
            };
            let have: std::collections::HashSet<Uuid> = found.iter().map(|r| r.call_id).collect();
            let pending: Vec<Uuid> = call_ids
                .iter()
                .copied()
                .filter(|id| !have.contains(id))
                .collect();

            if pending.is_empty() || tokio::time::Instant::now() >= deadline {
                return (found, pending);
            }

            tokio::time::sleep(poll_interval.min(deadline - tokio::time::Instant::now()))
                .await;
        }
    }
}

/// Build the correlation row for a completed run, persisted by `Planner::run`
/// for the audit trail described in §3 ("the Planner owns run rows").
pub fn to_run_record(request: &RunRequest, response: &RunResponse) -> Run {
    Run {
        id: response.run_id,
        message: request.message.clone(),
        mode: request.mode,
        decision: response.decision.clone(),
        planned_tool_calls: response.planned_tool_calls.clone(),
        enqueued_call_ids: response.enqueued.clone(),
        assistant_message: response.assistant_message.clone(),
        errors: response.errors.clone(),
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::{Idempotency, IdempotencyMode, Schema, SchemaType};
    use fieldops_queue::memory::{InMemoryCallQueue, InMemoryReceiptStore, InMemoryRunStore};
    use std::collections::BTreeMap;

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

    fn test_registry() -> Registry {
        let mut task_props = BTreeMap::new();
        task_props.insert("title".to_string(), string_schema());
        task_props.insert("domain".to_string(), string_schema());
        task_props.insert("lead_id".to_string(), string_schema());
        let create_task = fieldops_core::Contract {
            name: "os.create_task".into(),
            description: String::new(),
            input_schema: object_schema(&["title"], task_props),
            output_schema: object_schema(&[], BTreeMap::new()),
            permissions: vec![],
            idempotency: Idempotency::none(),
            timeout_ms: 5000,
            receipt_fields: vec![],
        };

        let mut lead_props = BTreeMap::new();
        lead_props.insert("name".to_string(), string_schema());
        lead_props.insert("phone".to_string(), string_schema());
        let create_lead = fieldops_core::Contract {
            name: "leads.create".into(),
            description: String::new(),
            input_schema: object_schema(&["name", "phone"], lead_props),
            output_schema: object_schema(&[], BTreeMap::new()),
            permissions: vec![],
            idempotency: Idempotency {
                mode: IdempotencyMode::Keyed,
                key_field: Some("phone".into()),
            },
            timeout_ms: 5000,
            receipt_fields: vec![],
        };

        Registry::from_contracts(vec![create_task, create_lead]).unwrap()
    }

    fn harness() -> (Planner, std::sync::Arc<InMemoryCallQueue>, std::sync::Arc<InMemoryRunStore>) {
        let registry = Arc::new(test_registry());
        let queue = Arc::new(InMemoryCallQueue::new());
        let receipts = Arc::new(InMemoryReceiptStore::new());
        let runs = Arc::new(InMemoryRunStore::new());
        let planner = Planner::new(
            RuleSet::default_rules(),
            registry,
            queue.clone(),
            receipts,
            runs.clone(),
        );
        (planner, queue, runs)
    }

    #[tokio::test]
    async fn plan_mode_compiles_without_enqueueing() {
        let (planner, queue, _runs) = harness();
        let mut request = RunRequest::new("create task: call John");
        request.mode = RunMode::Plan;
        let response = planner.run(request).await;

        assert!(response.ok);
        assert!(response.enqueued.is_empty());
        assert_eq!(response.planned_tool_calls.len(), 1);
        assert_eq!(response.planned_tool_calls[0].tool_name, "os.create_task");
        assert_eq!(response.planned_tool_calls[0].input["title"], "call John");
        assert!(queue.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_matching_rule_is_reported_as_an_error_and_nothing_is_enqueued() {
        let (planner, _queue, _runs) = harness();
        let response = planner.run(RunRequest::new("what's the weather")).await;

        assert!(!response.ok);
        assert!(response.enqueued.is_empty());
        assert!(response.errors.iter().any(|e| e.starts_with("no_matching_rule")));
    }

    #[tokio::test]
    async fn enqueue_mode_enqueues_a_contract_valid_call() {
        let (planner, queue, runs) = harness();
        let mut request = RunRequest::new("create task: follow up with lead");
        request.mode = RunMode::Enqueue;
        let response = planner.run(request).await;

        assert!(response.ok);
        assert_eq!(response.enqueued.len(), 1);
        let enqueued = queue.get(response.enqueued[0]).await.unwrap().unwrap();
        assert_eq!(enqueued.tool_name, "os.create_task");
        assert_eq!(enqueued.input["title"], "follow up with lead");
    }

    #[tokio::test]
    async fn invalid_produced_call_is_rejected_before_enqueueing() {
        let (planner, queue, _runs) = harness();
        let mut request = RunRequest::new("create a lead for this inquiry");
        request.mode = RunMode::Enqueue;
        let response = planner.run(request).await;

        assert!(!response.ok);
        assert!(response.enqueued.is_empty());
        assert!(!response.errors.is_empty());
        assert!(queue.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn answer_mode_never_touches_the_queue() {
        let (planner, _queue, _runs) = harness();
        let mut request = RunRequest::new("what can you do?");
        request.mode = RunMode::Answer;
        let response = planner.run(request).await;

        assert!(response.ok);
        assert!(response.assistant_message.is_some());
        assert!(response.planned_tool_calls.is_empty());
    }

    #[tokio::test]
    async fn every_run_persists_a_correlation_record() {
        let (planner, _queue, runs) = harness();
        let mut request = RunRequest::new("create task: call John");
        request.mode = RunMode::Enqueue;
        let response = planner.run(request).await;

        let stored = runs.get(response.run_id).await.unwrap().unwrap();
        assert_eq!(stored.message, "create task: call John");
        assert_eq!(stored.mode, RunMode::Enqueue);
        assert_eq!(stored.enqueued_call_ids, response.enqueued);
    }

    #[tokio::test]
    async fn a_run_with_no_matching_rule_still_persists_a_record() {
        let (planner, _queue, runs) = harness();
        let response = planner.run(RunRequest::new("what's the weather")).await;

        let stored = runs.get(response.run_id).await.unwrap().unwrap();
        assert!(!stored.ok());
        assert!(stored.errors.iter().any(|e| e.starts_with("no_matching_rule")));
    }
}
