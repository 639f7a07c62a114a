//! Loads, validates, and serves tool contracts. The registry is built once
//! at process start from a catalog document and is immutable thereafter —
//! every lookup is infallible except "not found".

mod validate;

use std::collections::HashMap;
use std::path::Path;

use fieldops_core::Contract;
use serde::Deserialize;
use thiserror::Error;

pub use validate::{PatternCache, ValidationError};

#[derive(Debug, Deserialize)]
pub struct Catalog {
    pub version: String,
    pub tools: Vec<Contract>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate tool contract: {0}")]
    Duplicate(String),
    #[error("invalid contract name {0:?}: must match domain.method, lowercase with underscores")]
    InvalidName(String),
    #[error("tool {tool} declares idempotency mode keyed but no key_field")]
    MissingKeyField { tool: String },
    #[error("tool {tool} key_field {key_field:?} is not a declared input property")]
    UnknownKeyField { tool: String, key_field: String },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool {tool} declares an invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        tool: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("tool {tool} declares timeout_ms {timeout_ms}, outside the allowed [1000, 300000] range")]
    TimeoutOutOfRange { tool: String, timeout_ms: u32 },
}

const MIN_TIMEOUT_MS: u32 = 1000;
const MAX_TIMEOUT_MS: u32 = 300_000;

/// Names are `domain.method`, lowercase ascii letters/underscores per
/// segment, joined by at least one dot.
fn is_valid_tool_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments
        .iter()
        .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_lowercase() || c == '_'))
}

/// The in-memory catalog of contracts, loaded once and served for the life
/// of the process.
#[derive(Debug, Default)]
pub struct Registry {
    contracts: HashMap<String, Contract>,
    patterns: PatternCache,
}

impl Registry {
    pub fn from_contracts(tools: Vec<Contract>) -> Result<Self, RegistryError> {
        let mut contracts = HashMap::with_capacity(tools.len());
        let mut patterns = PatternCache::default();
        for contract in tools {
            if !is_valid_tool_name(&contract.name) {
                return Err(RegistryError::InvalidName(contract.name));
            }
            if contracts.contains_key(&contract.name) {
                return Err(RegistryError::Duplicate(contract.name));
            }
            if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&contract.timeout_ms) {
                return Err(RegistryError::TimeoutOutOfRange {
                    tool: contract.name,
                    timeout_ms: contract.timeout_ms,
                });
            }
            if contract.idempotency.mode == fieldops_core::IdempotencyMode::Keyed {
                let key_field = contract
                    .key_field()
                    .ok_or_else(|| RegistryError::MissingKeyField {
                        tool: contract.name.clone(),
                    })?;
                let declared = contract
                    .input_schema
                    .properties
                    .as_ref()
                    .map(|props| props.contains_key(key_field))
                    .unwrap_or(false);
                if !declared {
                    return Err(RegistryError::UnknownKeyField {
                        tool: contract.name.clone(),
                        key_field: key_field.to_string(),
                    });
                }
            }
            patterns
                .ingest(&contract.input_schema)
                .map_err(|(pattern, source)| RegistryError::InvalidPattern {
                    tool: contract.name.clone(),
                    pattern,
                    source,
                })?;
            patterns
                .ingest(&contract.output_schema)
                .map_err(|(pattern, source)| RegistryError::InvalidPattern {
                    tool: contract.name.clone(),
                    pattern,
                    source,
                })?;
            contracts.insert(contract.name.clone(), contract);
        }
        Ok(Self { contracts, patterns })
    }

    pub fn load_from_str(json: &str) -> Result<Self, RegistryError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        tracing::info!(version = %catalog.version, tool_count = catalog.tools.len(), "loaded tool catalog");
        Self::from_contracts(catalog.tools)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::load_from_str(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn validate_input(
        &self,
        contract: &Contract,
        input: &serde_json::Value,
    ) -> Result<(), ValidationError> {
        validate::validate_value(&contract.input_schema, input, "$", &self.patterns)
    }

    pub fn validate_output(
        &self,
        contract: &Contract,
        output: &serde_json::Value,
    ) -> Result<(), ValidationError> {
        validate::validate_value(&contract.output_schema, output, "$", &self.patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::{Idempotency, IdempotencyMode, Schema, SchemaType};
    use std::collections::BTreeMap;

    fn object_schema(required: &[&str], properties: BTreeMap<String, Schema>) -> Schema {
        Schema {
            schema_type: SchemaType::Object,
            description: None,
            properties: Some(properties),
            required: required.iter().map(|s| s.to_string()).collect(),
            items: None,
            enum_values: None,
            pattern: None,
            format: None,
            additional_properties: Some(false),
        }
    }

    fn string_schema() -> Schema {
        Schema {
            schema_type: SchemaType::String,
            description: None,
            properties: None,
            required: vec![],
            items: None,
            enum_values: None,
            pattern: None,
            format: None,
            additional_properties: None,
        }
    }

    fn leads_create_contract() -> Contract {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), string_schema());
        props.insert("phone".to_string(), string_schema());
        Contract {
            name: "leads.create".into(),
            description: "Create a lead".into(),
            input_schema: object_schema(&["name", "phone"], props),
            output_schema: object_schema(&[], BTreeMap::new()),
            permissions: vec![],
            idempotency: Idempotency {
                mode: IdempotencyMode::Keyed,
                key_field: Some("phone".into()),
            },
            timeout_ms: 5000,
            receipt_fields: vec![],
        }
    }

    #[test]
    fn rejects_invalid_name() {
        let mut c = leads_create_contract();
        c.name = "LeadsCreate".into();
        let err = Registry::from_contracts(vec![c]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }

    #[test]
    fn rejects_timeout_below_minimum() {
        let mut c = leads_create_contract();
        c.timeout_ms = 50;
        let err = Registry::from_contracts(vec![c]).unwrap_err();
        assert!(matches!(err, RegistryError::TimeoutOutOfRange { .. }));
    }

    #[test]
    fn rejects_timeout_above_maximum() {
        let mut c = leads_create_contract();
        c.timeout_ms = 1_000_000;
        let err = Registry::from_contracts(vec![c]).unwrap_err();
        assert!(matches!(err, RegistryError::TimeoutOutOfRange { .. }));
    }

    #[test]
    fn accepts_timeout_at_range_boundaries() {
        let mut low = leads_create_contract();
        low.timeout_ms = 1000;
        assert!(Registry::from_contracts(vec![low]).is_ok());

        let mut high = leads_create_contract();
        high.timeout_ms = 300_000;
        assert!(Registry::from_contracts(vec![high]).is_ok());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Registry::from_contracts(vec![leads_create_contract(), leads_create_contract()])
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn rejects_keyed_mode_with_undeclared_key_field() {
        let mut c = leads_create_contract();
        c.idempotency.key_field = Some("not_a_property".into());
        let err = Registry::from_contracts(vec![c]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownKeyField { .. }));
    }

    #[test]
    fn get_returns_loaded_contract() {
        let registry = Registry::from_contracts(vec![leads_create_contract()]).unwrap();
        assert!(registry.get("leads.create").is_some());
        assert!(registry.get("leads.destroy").is_none());
    }

    #[test]
    fn validate_input_rejects_missing_required_field() {
        let registry = Registry::from_contracts(vec![leads_create_contract()]).unwrap();
        let contract = registry.get("leads.create").unwrap();
        let err = registry
            .validate_input(contract, &serde_json::json!({"name": "Sarah M"}))
            .unwrap_err();
        assert!(err.message.contains("phone"));
    }

    #[test]
    fn validate_input_accepts_well_formed_input() {
        let registry = Registry::from_contracts(vec![leads_create_contract()]).unwrap();
        let contract = registry.get("leads.create").unwrap();
        registry
            .validate_input(
                contract,
                &serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
            )
            .unwrap();
    }

    #[test]
    fn validate_input_enforces_declared_pattern() {
        let mut c = leads_create_contract();
        c.input_schema
            .properties
            .as_mut()
            .unwrap()
            .get_mut("phone")
            .unwrap()
            .pattern = Some(r"^\+?[0-9]{8,15}$".to_string());
        let registry = Registry::from_contracts(vec![c]).unwrap();
        let contract = registry.get("leads.create").unwrap();

        let err = registry
            .validate_input(
                contract,
                &serde_json::json!({"name": "Sarah M", "phone": "not-a-phone"}),
            )
            .unwrap_err();
        assert!(err.message.contains("pattern"));

        registry
            .validate_input(
                contract,
                &serde_json::json!({"name": "Sarah M", "phone": "+61400000001"}),
            )
            .unwrap();
    }

    #[test]
    fn rejects_contract_with_invalid_pattern() {
        let mut c = leads_create_contract();
        c.input_schema
            .properties
            .as_mut()
            .unwrap()
            .get_mut("phone")
            .unwrap()
            .pattern = Some("(unterminated".to_string());
        let err = Registry::from_contracts(vec![c]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
    }
}
