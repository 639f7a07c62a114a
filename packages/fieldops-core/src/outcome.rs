//! The sum-typed result a handler hands back to the worker. Narrowing the
//! loose "object with a status field" shape from the source system into a
//! real enum is what lets the worker match exhaustively in `§4.3.f`.

use serde::{Deserialize, Serialize};

use crate::receipt::Effects;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded {
        result: serde_json::Value,
        #[serde(default)]
        effects: Effects,
    },
    NotConfigured {
        reason: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required_env: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        next_steps: Vec<String>,
    },
    Failed {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl Outcome {
    pub fn succeeded(result: serde_json::Value) -> Self {
        Self::Succeeded {
            result,
            effects: Effects::default(),
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_configured(reason: impl Into<String>) -> Self {
        Self::NotConfigured {
            reason: reason.into(),
            required_env: vec![],
            next_steps: vec![],
        }
    }
}
