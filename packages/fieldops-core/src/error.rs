//! Typed error boundary. `anyhow::Error` is the internal transport inside
//! handler bodies and setup code; nothing crosses a crate boundary as a bare
//! `anyhow::Error` — it gets narrowed to one of these variants first.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("validation error at {path}: {message}")]
    Validation { path: String, message: String },

    #[error("handler exceeded its {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u32 },

    #[error("execution error [{code}]: {message}")]
    Execution { code: String, message: String },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SubstrateError {
    /// The stable, receipt-facing error code for this failure.
    pub fn code(&self) -> &str {
        match self {
            Self::UnknownTool(_) => error_codes::UNKNOWN_TOOL,
            Self::Validation { .. } => error_codes::VALIDATION_ERROR,
            Self::Timeout { .. } => error_codes::TIMEOUT,
            Self::Execution { code, .. } => code,
            Self::Registry(_) | Self::Queue(_) | Self::Other(_) => error_codes::EXECUTION_ERROR,
        }
    }
}

/// Stable receipt `result.error.code` values. Handlers are free to return
/// their own `code` for `Outcome::Failed`; these are the codes the worker
/// itself assigns when it fast-rejects a call before dispatch.
pub mod error_codes {
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const TIMEOUT: &str = "timeout";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const INTEGRATION_API_ERROR: &str = "integration_api_error";
    pub const INTEGRATION_AUTH_FAILED: &str = "integration_auth_failed";
    pub const INTEGRATION_NOT_CONFIGURED: &str = "integration_not_configured";
    pub const LEASE_EXHAUSTED: &str = "lease_exhausted";
    pub const MISSING_RECEIPT: &str = "missing_receipt";
    pub const OUTPUT_VALIDATION_ERROR: &str = "output_validation_error";
}
