//! Thin CLI wrapper over the Planner (§6, §11): a single-shot command that
//! either calls a running daemon over HTTP, or — when no `DAEMON_URL` is
//! set — builds an in-process `Planner` against the same `DATABASE_URL`
//! for stateless invocations from scripts/CI. Always prints one JSON
//! response object to stdout; exit code reflects `ok`.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fieldops_core::RunMode;
use fieldops_planner::{Planner, RunLimits, RunRequest, RunResponse, RuleSet};
use fieldops_queue::postgres::{PgCallQueue, PgReceiptStore, PgRunStore};
use fieldops_registry::Registry;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Answer,
    Plan,
    Enqueue,
    EnqueueAndWait,
}

impl From<CliMode> for RunMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Answer => RunMode::Answer,
            CliMode::Plan => RunMode::Plan,
            CliMode::Enqueue => RunMode::Enqueue,
            CliMode::EnqueueAndWait => RunMode::EnqueueAndWait,
        }
    }
}

/// Single-shot invocation of the tool-call planner.
#[derive(Debug, Parser)]
#[command(name = "fieldops", version, about)]
struct Cli {
    /// The natural-language-shaped request to compile into tool calls.
    #[arg(long)]
    message: String,

    /// How far the planner should go: answer only, plan without
    /// enqueueing, enqueue, or enqueue and wait for receipts.
    #[arg(long, value_enum, default_value = "enqueue")]
    mode: CliMode,

    /// Structured hints the message alone can't express, as a JSON object
    /// (e.g. `{"phone":"+61400000001"}`).
    #[arg(long)]
    context: Option<String>,

    #[arg(long)]
    max_tool_calls: Option<usize>,

    #[arg(long)]
    wait_timeout_ms: Option<u64>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

impl Cli {
    fn context_value(&self) -> Result<serde_json::Value> {
        match &self.context {
            Some(raw) => serde_json::from_str(raw).context("--context must be a valid JSON object"),
            None => Ok(serde_json::json!({})),
        }
    }

    fn run_request(&self) -> Result<RunRequest> {
        let mut request = RunRequest::new(self.message.clone());
        request.mode = self.mode.into();
        request.context = self.context_value()?;
        let defaults = RunLimits::default();
        request.limits = RunLimits {
            max_tool_calls: self.max_tool_calls.unwrap_or(defaults.max_tool_calls),
            wait_timeout_ms: self.wait_timeout_ms.unwrap_or(defaults.wait_timeout_ms),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        };
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let request = cli.run_request()?;

    let response = match std::env::var("DAEMON_URL") {
        Ok(daemon_url) => run_via_http(&daemon_url, &request).await?,
        Err(_) => run_in_process(request).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response_ok(&response) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn response_ok(response: &serde_json::Value) -> bool {
    response.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false)
}

/// Talks to a running daemon's `POST /run`, as specified in §6.
async fn run_via_http(daemon_url: &str, request: &RunRequest) -> Result<serde_json::Value> {
    let body = serde_json::json!({
        "message": request.message,
        "mode": request.mode,
        "context": request.context,
        "limits": {
            "max_tool_calls": request.limits.max_tool_calls,
            "wait_timeout_ms": request.limits.wait_timeout_ms,
            "poll_interval_ms": request.limits.poll_interval_ms,
        }
    });
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/run", daemon_url.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("failed to reach daemon")?
        .error_for_status()
        .context("daemon returned an error status")?
        .json::<serde_json::Value>()
        .await
        .context("failed to decode daemon response")?;
    Ok(response)
}

/// Constructs a `Planner` directly against `DATABASE_URL`, for stateless
/// CLI use without a running daemon (§11). A separate worker fleet is
/// still responsible for actually executing enqueued calls; this mode
/// simply compiles and enqueues/waits the same way the daemon's `/run`
/// handler does.
async fn run_in_process(request: RunRequest) -> Result<serde_json::Value> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set when DAEMON_URL is not")?;
    let catalog_path =
        std::env::var("TOOL_CATALOG_PATH").unwrap_or_else(|_| "catalog/tools.json".to_string());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    let registry = Arc::new(Registry::load_from_path(&catalog_path).context("failed to load tool catalog")?);
    let queue = Arc::new(PgCallQueue::new(pool.clone()));
    let receipts = Arc::new(PgReceiptStore::new(pool.clone()));
    let runs = Arc::new(PgRunStore::new(pool));
    let planner = Planner::new(RuleSet::default_rules(), registry, queue, receipts, runs);

    let response: RunResponse = planner.run(request).await;
    Ok(serde_json::to_value(response)?)
}
