//! The immutable, terminal record of a call's execution outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::contract::IdempotencyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Succeeded,
    Failed,
    NotConfigured,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NotConfigured => "not_configured",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbWrite {
    pub table: String,
    pub action: DbAction,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEffect {
    pub mode: IdempotencyMode,
    pub hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_value: Option<String>,
}

/// The audit record of observable side effects a handler reports alongside
/// its result. An empty `Effects` is the norm for failures and not-configured
/// outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Effects {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub db_writes: Vec<DbWrite>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub db_reads: Vec<DbWrite>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages_sent: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_calls: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<IdempotencyEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Receipt {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub call_id: Uuid,

    pub tool_name: String,

    pub status: ReceiptStatus,

    #[builder(default = serde_json::json!({}))]
    pub result: serde_json::Value,

    #[builder(default)]
    pub effects: Effects,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}
