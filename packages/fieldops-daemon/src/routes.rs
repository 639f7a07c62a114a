//! The Planner HTTP surface (§6/§11): `POST /run`, `GET /tools`, `GET
//! /health`. Thin call-throughs to `Planner`/`Registry` — no new semantics
//! live here.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fieldops_core::RunMode;
use fieldops_planner::{RunLimits, RunRequest, RunResponse};
use serde::{Deserialize, Serialize};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequestBody {
    pub message: String,
    #[serde(default)]
    pub mode: Option<RunMode>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub limits: Option<RunLimitsBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunLimitsBody {
    pub max_tool_calls: Option<usize>,
    pub wait_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl From<RunRequestBody> for RunRequest {
    fn from(body: RunRequestBody) -> Self {
        let mut request = RunRequest::new(body.message);
        if let Some(mode) = body.mode {
            request.mode = mode;
        }
        if let Some(context) = body.context {
            request.context = context;
        }
        if let Some(limits) = body.limits {
            let defaults = RunLimits::default();
            request.limits = RunLimits {
                max_tool_calls: limits.max_tool_calls.unwrap_or(defaults.max_tool_calls),
                wait_timeout_ms: limits.wait_timeout_ms.unwrap_or(defaults.wait_timeout_ms),
                poll_interval_ms: limits.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            };
        }
        request
    }
}

/// `POST /run`. A malformed body never reaches this handler — axum's `Json`
/// extractor rejects it with 400 first (§6: "Errors: 400 for malformed
/// body"); anything that reaches the planner and still produces an error is
/// surfaced in the 200 response's `errors[]`, per §4.4/§7.
pub async fn run_handler(
    State(state): State<AppState>,
    Json(body): Json<RunRequestBody>,
) -> Response {
    let request: RunRequest = body.into();
    if request.limits.wait_timeout_ms > 120_000 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "limits.wait_timeout_ms must not exceed 120000ms"
            })),
        )
            .into_response();
    }

    let response: RunResponse = state.planner.run(request).await;
    (StatusCode::OK, Json(response)).into_response()
}

pub async fn tools_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tools: Vec<_> = state.registry.all().cloned().collect();
    Json(serde_json::json!({ "tools": tools }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: DatabaseHealth,
    integrations: IntegrationsHealth,
}

#[derive(Debug, Serialize)]
struct DatabaseHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct IntegrationsHealth {
    sms: &'static str,
}

/// `GET /health`: liveness plus configured-vs-missing external dependencies
/// (§6). Mirrors the teacher's `health_handler` — a timed `SELECT 1` against
/// the pool determines overall status.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => DatabaseHealth {
            status: "ok",
            error: None,
        },
        Ok(Err(err)) => DatabaseHealth {
            status: "error",
            error: Some(err.to_string()),
        },
        Err(_) => DatabaseHealth {
            status: "error",
            error: Some("database query timed out after 5s".to_string()),
        },
    };

    let healthy = db_health.status == "ok";
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: db_health,
        integrations: IntegrationsHealth {
            sms: if state.sms_configured { "configured" } else { "not_configured" },
        },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(serde_json::to_value(body).unwrap()))
}
