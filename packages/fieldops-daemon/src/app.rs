//! Application state and router assembly, following the teacher's
//! `server/app.rs` pattern: one `AppState` cloned into every handler via
//! `axum::extract::State`, one `Router::new().route(...)` builder, one
//! `TraceLayer` wrapping the whole thing.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use fieldops_planner::Planner;
use fieldops_registry::Registry;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub planner: Arc<Planner>,
    pub db_pool: PgPool,
    pub sms_configured: bool,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/run", post(routes::run_handler))
        .route("/tools", get(routes::tools_handler))
        .route("/health", get(routes::health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(150)))
        .with_state(state)
}
