//! `os.*` handlers: general operational tasks (the catch-all to-do list a
//! planner rule can file work into without a more specific domain handler).

use std::sync::Arc;

use fieldops_core::{Effects, Outcome};
use fieldops_worker::{insert_effect, HandlerContext, HandlerRegistry};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub fn register(registry: &mut HandlerRegistry) {
    registry.register(
        "os",
        "create_task",
        Arc::new(|input: Value, ctx: HandlerContext| async move { handle_create_task(input, ctx).await }),
    );
}

async fn handle_create_task(input: Value, ctx: HandlerContext) -> Outcome {
    let Some(title) = input.get("title").and_then(Value::as_str) else {
        return Outcome::failed("validation_error", "missing required field 'title'");
    };
    let domain = input.get("domain").and_then(Value::as_str);
    let lead_id = input
        .get("lead_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok());

    let task_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"INSERT INTO tasks (id, title, domain, lead_id) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(task_id)
    .bind(title)
    .bind(domain)
    .bind(lead_id)
    .execute(ctx.db.pool())
    .await;

    match inserted {
        Ok(_) => {
            info!(call_id = %ctx.call_id, task_id = %task_id, "inserted task");
            Outcome::Succeeded {
                result: json!({ "task_id": task_id.to_string() }),
                effects: Effects {
                    db_writes: vec![insert_effect("tasks", task_id.to_string())],
                    ..Effects::default()
                },
            }
        }
        Err(err) => Outcome::failed("execution_error", format!("failed to insert task: {err}")),
    }
}
