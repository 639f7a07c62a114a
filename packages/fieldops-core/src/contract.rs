//! Tool contracts: the static, registry-owned description of what a tool
//! accepts, returns, and costs in permissions/time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaFormat {
    DateTime,
    Uuid,
    Uri,
}

/// A JSON-Schema subset: enough to describe tool inputs/outputs without
/// pulling in a general-purpose schema engine. See `fieldops-registry` for
/// the compiled validator built from this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SchemaFormat>,
    /// JSON-Schema default is `true`; `None` is treated as permissive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

impl Schema {
    pub fn allows_additional_properties(&self) -> bool {
        self.additional_properties.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[serde(rename = "read:db")]
    ReadDb,
    #[serde(rename = "write:db")]
    WriteDb,
    #[serde(rename = "read:files")]
    ReadFiles,
    #[serde(rename = "write:files")]
    WriteFiles,
    #[serde(rename = "send:comms")]
    SendComms,
    #[serde(rename = "call:external")]
    CallExternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyMode {
    #[default]
    None,
    SafeRetry,
    Keyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idempotency {
    pub mode: IdempotencyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
}

impl Idempotency {
    pub fn none() -> Self {
        Self {
            mode: IdempotencyMode::None,
            key_field: None,
        }
    }
}

/// The typed description of a tool: input/output schemas, permissions,
/// idempotency policy, and timeout. Loaded once from the catalog and never
/// mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub idempotency: Idempotency,
    pub timeout_ms: u32,
    #[serde(default)]
    pub receipt_fields: Vec<String>,
}

impl Contract {
    /// `domain.method` split into `(domain, method)` for handler dispatch.
    pub fn domain_and_method(&self) -> Option<(&str, &str)> {
        self.name.split_once('.')
    }

    pub fn key_field(&self) -> Option<&str> {
        self.idempotency.key_field.as_deref()
    }
}
