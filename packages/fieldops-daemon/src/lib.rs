//! Wiring for the thin outer HTTP surface (§11): loads config, the tool
//! catalog, and the Postgres pool, registers domain handlers, spawns N
//! worker tasks plus one sweeper, and assembles the axum router. `main.rs`
//! is the only thing this crate's binary adds on top of this module.

pub mod app;
pub mod config;
pub mod routes;
pub mod shutdown;

use std::sync::Arc;

use anyhow::{Context, Result};
use fieldops_handlers::comms::SmsHandler;
use fieldops_planner::{Planner, RuleSet};
use fieldops_queue::postgres::{PgCallQueue, PgReceiptStore, PgRunStore};
use fieldops_queue::{CallQueue, ReceiptStore, RunStore};
use fieldops_registry::Registry;
use fieldops_worker::{DomainDb, HandlerRegistry, Sweeper, Worker, WorkerConfig};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

pub use app::AppState;
pub use config::Config;

/// Everything `main` needs to serve HTTP and run the worker fleet. Built
/// once at startup; `run` consumes it and blocks until shutdown.
pub struct Daemon {
    pub config: Config,
    pub state: AppState,
    pub handlers: Arc<HandlerRegistry>,
    pub queue: Arc<dyn CallQueue>,
    pub receipts: Arc<dyn ReceiptStore>,
}

impl Daemon {
    pub async fn build(config: Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(&config.database_url)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        let registry = Arc::new(
            Registry::load_from_path(&config.tool_catalog_path)
                .context("failed to load tool catalog")?,
        );

        let queue: Arc<dyn CallQueue> = Arc::new(PgCallQueue::new(pool.clone()));
        let receipts: Arc<dyn ReceiptStore> = Arc::new(PgReceiptStore::new(pool.clone()));
        let runs: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));

        let sms = SmsHandler::from_env();
        let sms_configured = sms.is_configured();
        let mut handlers = HandlerRegistry::new();
        fieldops_handlers::register_all(&mut handlers, sms);
        let handlers = Arc::new(handlers);

        let planner = Arc::new(Planner::new(
            RuleSet::default_rules(),
            registry.clone(),
            queue.clone(),
            receipts.clone(),
            runs,
        ));

        let state = AppState {
            registry,
            planner,
            db_pool: pool,
            sms_configured,
        };

        Ok(Self {
            config,
            state,
            handlers,
            queue,
            receipts,
        })
    }

    /// Spawn `worker_count` worker tasks and one sweeper task, serve HTTP on
    /// `config.port`, and block until `shutdown` is cancelled. In-flight
    /// handler invocations are allowed to finish (bounded by their own
    /// `timeout_ms`) before this returns (§5).
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let db = DomainDb::new(self.state.db_pool.clone());
        let mut worker_tasks = Vec::with_capacity(self.config.worker_count);
        for i in 0..self.config.worker_count {
            let mut worker_config = WorkerConfig::new(format!("worker-{i}"));
            worker_config.poll_min_interval = std::time::Duration::from_millis(self.config.poll_min_ms);
            worker_config.poll_max_interval = std::time::Duration::from_millis(self.config.poll_max_ms);
            worker_config.lease_ttl = std::time::Duration::from_secs(self.config.lease_ttl_secs);
            worker_config.max_requeues = self.config.max_requeues;
            worker_config.strict_output_validation = self.config.strict_output_validation;

            let worker = Worker::new(
                worker_config,
                self.state.registry.clone(),
                self.handlers.clone(),
                self.queue.clone(),
                self.receipts.clone(),
                db.clone(),
            );
            let token = shutdown.clone();
            worker_tasks.push(tokio::spawn(worker.run(token)));
        }

        let sweeper = Sweeper::new(
            self.queue.clone(),
            self.receipts.clone(),
            std::time::Duration::from_secs(self.config.sweep_interval_secs),
            std::time::Duration::from_secs(self.config.lease_ttl_secs),
            self.config.max_requeues,
        );
        let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

        let router = app::build_app(self.state);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .with_context(|| format!("failed to bind to port {}", self.config.port))?;
        tracing::info!(port = self.config.port, workers = worker_tasks.len(), "fieldops-daemon listening");

        let server_shutdown = shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .context("axum server error")?;

        for task in worker_tasks {
            let _ = task.await;
        }
        let _ = sweeper_task.await;
        tracing::info!("fieldops-daemon shut down cleanly");
        Ok(())
    }
}
