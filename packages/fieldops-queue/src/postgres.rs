//! Postgres-backed `CallQueue`/`ReceiptStore`/`RunStore`. The claim query is the load-
//! bearing piece of the whole substrate: a `SELECT ... FOR UPDATE SKIP
//! LOCKED` inside a single `UPDATE ... RETURNING` statement guarantees at
//! most one worker ever observes a given row in `claimed` state, with no
//! application-level locking.
//!
//! `CallStatus`/`ReceiptStatus` are stored as `TEXT` rather than a Postgres
//! enum type so the core crate does not need an `sqlx::Type` dependency;
//! the mapping happens here, at the one place that talks to the database.

use std::time::Duration;

use async_trait::async_trait;
use fieldops_core::{Call, CallStatus, Effects, PlannedCall, Receipt, ReceiptStatus, Run, RunMode};
use sqlx::{postgres::PgPool, Row};
use uuid::Uuid;

use crate::{CallQueue, PutReceipt, QueueError, ReceiptStore, RunStore};

pub struct PgCallQueue {
    pool: PgPool,
}

impl PgCallQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_call(row: &sqlx::postgres::PgRow) -> Result<Call, QueueError> {
    let status: String = row.try_get("status")?;
    let status: CallStatus = status
        .parse()
        .map_err(|e: String| QueueError::Other(e))?;
    Ok(Call::builder()
        .id(row.try_get::<Uuid, _>("id")?)
        .tool_name(row.try_get::<String, _>("tool_name")?)
        .input(row.try_get::<serde_json::Value, _>("input")?)
        .idempotency_key(row.try_get::<Option<String>, _>("idempotency_key")?)
        .status(status)
        .worker_id(row.try_get::<Option<String>, _>("worker_id")?)
        .claimed_at(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("claimed_at")?)
        .error(row.try_get::<Option<serde_json::Value>, _>("error")?)
        .requeue_count(row.try_get::<i32, _>("requeue_count")? as u32)
        .created_at(row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?)
        .updated_at(row.try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")?)
        .build())
}

#[async_trait]
impl CallQueue for PgCallQueue {
    async fn enqueue(&self, call: Call) -> Result<Uuid, QueueError> {
        sqlx::query(
            r#"
            INSERT INTO calls (id, tool_name, input, idempotency_key, status, requeue_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(call.id)
        .bind(&call.tool_name)
        .bind(&call.input)
        .bind(&call.idempotency_key)
        .bind(call.status.as_str())
        .bind(call.requeue_count as i32)
        .bind(call.created_at)
        .bind(call.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(call.id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Call>, QueueError> {
        let row = sqlx::query(
            r#"
            WITH next_call AS (
                SELECT id
                FROM calls
                WHERE status = 'queued'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE calls
            SET status = 'claimed',
                worker_id = $1,
                claimed_at = NOW(),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_call)
            RETURNING id, tool_name, input, idempotency_key, status, worker_id,
                      claimed_at, error, requeue_count, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_call).transpose()
    }

    async fn mark_running(&self, call_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE calls SET status = 'running', updated_at = NOW() WHERE id = $1 AND status = 'claimed'",
        )
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::CallNotFound(call_id));
        }
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
        sqlx::query(
            r#"
            UPDATE calls
            SET status = $2, error = $3, updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('succeeded', 'failed', 'not_configured')
            "#,
        )
        .bind(call_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, call_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE calls SET updated_at = NOW() WHERE id = $1 AND worker_id = $2",
        )
        .bind(call_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::Other(format!(
                "call {call_id} is not held by worker {worker_id}"
            )));
        }
        Ok(())
    }

    async fn get(&self, call_id: Uuid) -> Result<Option<Call>, QueueError> {
        let row = sqlx::query(
            r#"SELECT id, tool_name, input, idempotency_key, status, worker_id,
                      claimed_at, error, requeue_count, created_at, updated_at
               FROM calls WHERE id = $1"#,
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_call).transpose()
    }

    async fn get_many(&self, call_ids: &[Uuid]) -> Result<Vec<Call>, QueueError> {
        let rows = sqlx::query(
            r#"SELECT id, tool_name, input, idempotency_key, status, worker_id,
                      claimed_at, error, requeue_count, created_at, updated_at
               FROM calls WHERE id = ANY($1)"#,
        )
        .bind(call_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_call).collect()
    }

    async fn list_terminal(&self, limit: i64) -> Result<Vec<Call>, QueueError> {
        let rows = sqlx::query(
            r#"SELECT id, tool_name, input, idempotency_key, status, worker_id,
                      claimed_at, error, requeue_count, created_at, updated_at
               FROM calls
               WHERE status IN ('succeeded', 'failed', 'not_configured')
               ORDER BY updated_at DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_call).collect()
    }

    async fn sweep_expired_leases(
        &self,
        lease_ttl: Duration,
        max_requeues: u32,
    ) -> Result<Vec<Uuid>, QueueError> {
        let ttl_ms = lease_ttl.as_millis() as f64;

        let exhausted_rows = sqlx::query(
            r#"
            UPDATE calls
            SET status = 'failed',
                error = jsonb_build_object('code', 'lease_exhausted',
                                           'message', format('lease exhausted after %s requeues', requeue_count)),
                updated_at = NOW()
            WHERE status IN ('claimed', 'running')
              AND updated_at < NOW() - ($1 || ' milliseconds')::INTERVAL
              AND requeue_count >= $2
            RETURNING id
            "#,
        )
        .bind(ttl_ms)
        .bind(max_requeues as i32)
        .fetch_all(&self.pool)
        .await?;
        tracing::debug!(count = exhausted_rows.len(), "leases exhausted by sweep");

        let requeued_rows = sqlx::query(
            r#"
            UPDATE calls
            SET status = 'queued',
                worker_id = NULL,
                claimed_at = NULL,
                requeue_count = requeue_count + 1,
                updated_at = NOW()
            WHERE status IN ('claimed', 'running')
              AND updated_at < NOW() - ($1 || ' milliseconds')::INTERVAL
              AND requeue_count < $2
            RETURNING id
            "#,
        )
        .bind(ttl_ms)
        .bind(max_requeues as i32)
        .fetch_all(&self.pool)
        .await?;

        requeued_rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(QueueError::from))
            .collect()
    }
}

pub struct PgReceiptStore {
    pool: PgPool,
}

impl PgReceiptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_receipt(row: &sqlx::postgres::PgRow) -> Result<Receipt, QueueError> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "succeeded" => ReceiptStatus::Succeeded,
        "failed" => ReceiptStatus::Failed,
        "not_configured" => ReceiptStatus::NotConfigured,
        other => return Err(QueueError::Other(format!("unrecognized receipt status: {other}"))),
    };
    let effects: serde_json::Value = row.try_get("effects")?;
    let effects: Effects = serde_json::from_value(effects).map_err(|e| QueueError::Other(e.to_string()))?;
    Ok(Receipt::builder()
        .id(row.try_get::<Uuid, _>("id")?)
        .call_id(row.try_get::<Uuid, _>("call_id")?)
        .tool_name(row.try_get::<String, _>("tool_name")?)
        .status(status)
        .result(row.try_get::<serde_json::Value, _>("result")?)
        .effects(effects)
        .created_at(row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?)
        .build())
}

#[async_trait]
impl ReceiptStore for PgReceiptStore {
    async fn put(&self, receipt: Receipt) -> Result<PutReceipt, QueueError> {
        let effects = serde_json::to_value(&receipt.effects).map_err(|e| QueueError::Other(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO receipts (id, call_id, tool_name, status, result, effects, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (call_id) DO NOTHING
            RETURNING id, call_id, tool_name, status, result, effects, created_at
            "#,
        )
        .bind(receipt.id)
        .bind(receipt.call_id)
        .bind(&receipt.tool_name)
        .bind(receipt.status.as_str())
        .bind(&receipt.result)
        .bind(effects)
        .bind(receipt.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(PutReceipt::Created(row_to_receipt(&row)?)),
            None => {
                let existing = self
                    .get_by_call_id(receipt.call_id)
                    .await?
                    .ok_or_else(|| QueueError::Other("receipt conflict but no existing row found".into()))?;
                Ok(PutReceipt::AlreadyExists(existing))
            }
        }
    }

    async fn get_by_call_id(&self, call_id: Uuid) -> Result<Option<Receipt>, QueueError> {
        let row = sqlx::query(
            "SELECT id, call_id, tool_name, status, result, effects, created_at FROM receipts WHERE call_id = $1",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_receipt).transpose()
    }

    async fn get_many_by_call_id(&self, call_ids: &[Uuid]) -> Result<Vec<Receipt>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, call_id, tool_name, status, result, effects, created_at FROM receipts WHERE call_id = ANY($1)",
        )
        .bind(call_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_receipt).collect()
    }

    async fn find_by_key(
        &self,
        tool_name: &str,
        key_field: &str,
        key_value: &str,
    ) -> Result<Option<Receipt>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, call_id, tool_name, status, result, effects, created_at
            FROM receipts
            WHERE tool_name = $1
              AND status = 'succeeded'
              AND effects -> 'idempotency' ->> 'key_field' = $2
              AND effects -> 'idempotency' ->> 'key_value' = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tool_name)
        .bind(key_field)
        .bind(key_value)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_receipt).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Receipt>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, call_id, tool_name, status, result, effects, created_at FROM receipts ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_receipt).collect()
    }
}

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<Run, QueueError> {
    let mode: String = row.try_get("mode")?;
    let mode: RunMode = mode.parse().map_err(QueueError::Other)?;
    let planned_tool_calls: serde_json::Value = row.try_get("planned_tool_calls")?;
    let planned_tool_calls: Vec<PlannedCall> =
        serde_json::from_value(planned_tool_calls).map_err(|e| QueueError::Other(e.to_string()))?;
    let errors: serde_json::Value = row.try_get("errors")?;
    let errors: Vec<String> =
        serde_json::from_value(errors).map_err(|e| QueueError::Other(e.to_string()))?;
    Ok(Run {
        id: row.try_get::<Uuid, _>("id")?,
        message: row.try_get::<String, _>("message")?,
        mode,
        decision: row.try_get::<Option<String>, _>("decision")?,
        planned_tool_calls,
        enqueued_call_ids: row.try_get::<Vec<Uuid>, _>("enqueued_call_ids")?,
        assistant_message: row.try_get::<Option<String>, _>("assistant_message")?,
        errors,
        created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn put(&self, run: Run) -> Result<(), QueueError> {
        let planned_tool_calls = serde_json::to_value(&run.planned_tool_calls)
            .map_err(|e| QueueError::Other(e.to_string()))?;
        let errors = serde_json::to_value(&run.errors).map_err(|e| QueueError::Other(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO runs (id, message, mode, decision, planned_tool_calls, enqueued_call_ids, assistant_message, errors, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id)
        .bind(&run.message)
        .bind(run.mode.as_str())
        .bind(&run.decision)
        .bind(planned_tool_calls)
        .bind(&run.enqueued_call_ids)
        .bind(&run.assistant_message)
        .bind(errors)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>, QueueError> {
        let row = sqlx::query(
            r#"SELECT id, message, mode, decision, planned_tool_calls, enqueued_call_ids,
                      assistant_message, errors, created_at
               FROM runs WHERE id = $1"#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Run>, QueueError> {
        let rows = sqlx::query(
            r#"SELECT id, message, mode, decision, planned_tool_calls, enqueued_call_ids,
                      assistant_message, errors, created_at
               FROM runs ORDER BY created_at DESC LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }
}
