//! The queue row: a single requested invocation of a tool and its lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Queued,
    Claimed,
    Running,
    Succeeded,
    Failed,
    NotConfigured,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::NotConfigured
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NotConfigured => "not_configured",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "not_configured" => Ok(Self::NotConfigured),
            other => Err(format!("unrecognized call status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Call {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub tool_name: String,

    #[builder(default = serde_json::json!({}))]
    pub input: serde_json::Value,

    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    #[builder(default)]
    pub status: CallStatus,

    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub claimed_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub error: Option<serde_json::Value>,

    /// Number of times the lease sweeper has reclaimed this call back to
    /// `queued`. Bounded by the worker's `max_requeues`; exceeding it is a
    /// terminal `lease_exhausted` failure (§4.2).
    #[builder(default = 0)]
    pub requeue_count: u32,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Call::builder().tool_name(tool_name).input(input).build()
    }
}
