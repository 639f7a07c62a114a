//! `quotes.*` handlers: recording a price quote against a lead.

use std::sync::Arc;

use fieldops_core::{Effects, Outcome};
use fieldops_worker::{insert_effect, HandlerContext, HandlerRegistry};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub fn register(registry: &mut HandlerRegistry) {
    registry.register(
        "quotes",
        "create",
        Arc::new(|input: Value, ctx: HandlerContext| async move { handle_create(input, ctx).await }),
    );
}

async fn handle_create(input: Value, ctx: HandlerContext) -> Outcome {
    let Some(lead_id) = input
        .get("lead_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return Outcome::failed("validation_error", "missing or invalid required field 'lead_id'");
    };
    let Some(amount_cents) = input.get("amount_cents").and_then(Value::as_i64) else {
        return Outcome::failed("validation_error", "missing required field 'amount_cents'");
    };
    let currency = input
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("AUD");

    let quote_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"INSERT INTO quotes (id, lead_id, amount_cents, currency) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(quote_id)
    .bind(lead_id)
    .bind(amount_cents)
    .bind(currency)
    .execute(ctx.db.pool())
    .await;

    match inserted {
        Ok(_) => {
            info!(call_id = %ctx.call_id, quote_id = %quote_id, "created quote");
            Outcome::Succeeded {
                result: json!({ "quote_id": quote_id.to_string() }),
                effects: Effects {
                    db_writes: vec![insert_effect("quotes", quote_id.to_string())],
                    ..Effects::default()
                },
            }
        }
        Err(err) => Outcome::failed("execution_error", format!("failed to insert quote: {err}")),
    }
}
