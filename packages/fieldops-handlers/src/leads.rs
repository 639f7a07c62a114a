//! `leads.*` handlers: the lead-intake side of the platform.

use std::sync::Arc;

use fieldops_core::{Effects, Outcome};
use fieldops_worker::{insert_effect, HandlerContext, HandlerRegistry};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub fn register(registry: &mut HandlerRegistry) {
    registry.register(
        "leads",
        "create",
        Arc::new(|input: Value, ctx: HandlerContext| async move { handle_create(input, ctx).await }),
    );
}

/// Insert a new lead. Idempotency is the worker's job (`phone` is the
/// keyed field declared on the `leads.create` contract); by the time this
/// handler runs, the worker has already confirmed no succeeded receipt
/// exists yet for this phone number.
async fn handle_create(input: Value, ctx: HandlerContext) -> Outcome {
    let Some(name) = input.get("name").and_then(Value::as_str) else {
        return Outcome::failed("validation_error", "missing required field 'name'");
    };
    let Some(phone) = input.get("phone").and_then(Value::as_str) else {
        return Outcome::failed("validation_error", "missing required field 'phone'");
    };
    let suburb = input.get("suburb").and_then(Value::as_str);
    let source = input.get("source").and_then(Value::as_str);

    let lead_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"INSERT INTO leads (id, name, phone, suburb, source) VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(lead_id)
    .bind(name)
    .bind(phone)
    .bind(suburb)
    .bind(source)
    .execute(ctx.db.pool())
    .await;

    match inserted {
        Ok(_) => {
            info!(call_id = %ctx.call_id, lead_id = %lead_id, "inserted lead");
            Outcome::Succeeded {
                result: json!({ "lead_id": lead_id.to_string() }),
                effects: Effects {
                    db_writes: vec![insert_effect("leads", lead_id.to_string())],
                    ..Effects::default()
                },
            }
        }
        Err(err) => Outcome::failed("execution_error", format!("failed to insert lead: {err}")),
    }
}
