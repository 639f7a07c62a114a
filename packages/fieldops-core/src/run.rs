//! Correlation record linking a planner request to the calls it enqueued.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Answer,
    Plan,
    #[default]
    Enqueue,
    EnqueueAndWait,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Plan => "plan",
            Self::Enqueue => "enqueue",
            Self::EnqueueAndWait => "enqueue_and_wait",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answer" => Ok(Self::Answer),
            "plan" => Ok(Self::Plan),
            "enqueue" => Ok(Self::Enqueue),
            "enqueue_and_wait" => Ok(Self::EnqueueAndWait),
            other => Err(format!("unrecognized run mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool_name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Run {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub message: String,

    #[builder(default)]
    pub mode: RunMode,

    #[builder(default, setter(strip_option))]
    pub decision: Option<String>,

    #[builder(default)]
    pub planned_tool_calls: Vec<PlannedCall>,

    #[builder(default)]
    pub enqueued_call_ids: Vec<Uuid>,

    #[builder(default, setter(strip_option))]
    pub assistant_message: Option<String>,

    #[builder(default)]
    pub errors: Vec<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}
