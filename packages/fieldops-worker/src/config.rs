use std::time::Duration;

/// Tuning knobs for a single worker's poll/claim/backoff loop. Mirrors the
/// shape of a typical background-job worker config: bounded batch, bounded
/// backoff, a heartbeat cadence shorter than any contract's timeout.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_min_interval: Duration,
    pub poll_max_interval: Duration,
    pub heartbeat_interval: Duration,
    pub lease_ttl: Duration,
    pub max_requeues: u32,
    /// When true, a handler's output failing `Registry::validate_output`
    /// flips the call's terminal status to `failed` instead of only
    /// logging a warning (§4.3.g).
    pub strict_output_validation: bool,
    pub shutdown_drain_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_min_interval: Duration::from_millis(100),
            poll_max_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(120),
            max_requeues: 3,
            strict_output_validation: false,
            shutdown_drain_timeout: Duration::from_secs(30),
        }
    }
}
