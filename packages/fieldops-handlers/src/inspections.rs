//! `inspections.*` handlers: scheduling a site inspection against a lead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldops_core::{Effects, Outcome};
use fieldops_worker::{insert_effect, HandlerContext, HandlerRegistry};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub fn register(registry: &mut HandlerRegistry) {
    registry.register(
        "inspections",
        "schedule",
        Arc::new(|input: Value, ctx: HandlerContext| async move { handle_schedule(input, ctx).await }),
    );
}

async fn handle_schedule(input: Value, ctx: HandlerContext) -> Outcome {
    let Some(lead_id) = input
        .get("lead_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return Outcome::failed("validation_error", "missing or invalid required field 'lead_id'");
    };
    let Some(scheduled_at) = input
        .get("scheduled_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
    else {
        return Outcome::failed(
            "validation_error",
            "missing or invalid required field 'scheduled_at' (expected RFC3339)",
        );
    };
    let notes = input.get("notes").and_then(Value::as_str);

    let inspection_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"INSERT INTO inspections (id, lead_id, scheduled_at, notes) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(inspection_id)
    .bind(lead_id)
    .bind(scheduled_at)
    .bind(notes)
    .execute(ctx.db.pool())
    .await;

    match inserted {
        Ok(_) => {
            info!(call_id = %ctx.call_id, inspection_id = %inspection_id, "scheduled inspection");
            Outcome::Succeeded {
                result: json!({ "inspection_id": inspection_id.to_string() }),
                effects: Effects {
                    db_writes: vec![insert_effect("inspections", inspection_id.to_string())],
                    ..Effects::default()
                },
            }
        }
        Err(err) => Outcome::failed(
            "execution_error",
            format!("failed to insert inspection: {err}"),
        ),
    }
}
