//! Daemon configuration, loaded once at startup the same way as the
//! teacher's `Config::from_env`: `dotenvy::dotenv()` then `std::env::var`
//! with `anyhow::Context` on anything required.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub tool_catalog_path: String,
    pub port: u16,
    pub worker_count: usize,
    pub poll_min_ms: u64,
    pub poll_max_ms: u64,
    pub lease_ttl_secs: u64,
    pub max_requeues: u32,
    pub sweep_interval_secs: u64,
    pub strict_output_validation: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            tool_catalog_path: env::var("TOOL_CATALOG_PATH")
                .unwrap_or_else(|_| "catalog/tools.json".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            poll_min_ms: env::var("POLL_MIN_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("POLL_MIN_MS must be a valid number")?,
            poll_max_ms: env::var("POLL_MAX_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .context("POLL_MAX_MS must be a valid number")?,
            lease_ttl_secs: env::var("LEASE_TTL_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("LEASE_TTL_SECS must be a valid number")?,
            max_requeues: env::var("MAX_REQUEUES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_REQUEUES must be a valid number")?,
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("SWEEP_INTERVAL_SECS must be a valid number")?,
            strict_output_validation: env::var("STRICT_OUTPUT_VALIDATION")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
