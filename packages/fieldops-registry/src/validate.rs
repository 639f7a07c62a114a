//! The compiled-schema validator behind `Registry::validate_input` /
//! `validate_output`. Walks a `Schema` against a `serde_json::Value`
//! recursively; there is no separate "compile" step for the schema shape
//! itself because the subset (§3 of the tool contract spec) is small enough
//! to interpret directly, but every `pattern` a contract declares is
//! compiled once into a `Regex` at catalog load time (see
//! `PatternCache::ingest`) and looked up here, never recompiled per call.

use std::collections::HashMap;

use chrono::DateTime;
use fieldops_core::{Schema, SchemaFormat, SchemaType};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Every distinct `pattern` string declared across a loaded catalog,
/// compiled once and keyed by its source text. Schemas reuse identical
/// patterns across contracts (e.g. a phone-number pattern shared by
/// `leads.create` and `leads.update`), so compiling by source text rather
/// than per-`Schema` avoids redundant compilation.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    /// Walk `schema` (and everything nested under it), compiling and
    /// inserting any pattern not already present. Called once per contract
    /// at registry construction time. On failure, returns the offending
    /// pattern source alongside the compile error.
    pub fn ingest(&mut self, schema: &Schema) -> Result<(), (String, regex::Error)> {
        collect_patterns(schema, &mut self.compiled)
    }

    fn get(&self, pattern: &str) -> Option<&Regex> {
        self.compiled.get(pattern)
    }
}

fn collect_patterns(
    schema: &Schema,
    into: &mut HashMap<String, Regex>,
) -> Result<(), (String, regex::Error)> {
    if let Some(pattern) = &schema.pattern {
        if !into.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|e| (pattern.clone(), e))?;
            into.insert(pattern.clone(), compiled);
        }
    }
    if let Some(properties) = &schema.properties {
        for prop in properties.values() {
            collect_patterns(prop, into)?;
        }
    }
    if let Some(items) = &schema.items {
        collect_patterns(items, into)?;
    }
    Ok(())
}

pub fn validate_value(
    schema: &Schema,
    value: &Value,
    path: &str,
    patterns: &PatternCache,
) -> Result<(), ValidationError> {
    match schema.schema_type {
        SchemaType::Object => validate_object(schema, value, path, patterns),
        SchemaType::Array => validate_array(schema, value, path, patterns),
        SchemaType::String => validate_string(schema, value, path, patterns),
        SchemaType::Integer => validate_integer(value, path),
        SchemaType::Number => validate_number(value, path),
        SchemaType::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(ValidationError::new(path, format!("{path} must be a boolean")))
            }
        }
    }
}

fn validate_object(
    schema: &Schema,
    value: &Value,
    path: &str,
    patterns: &PatternCache,
) -> Result<(), ValidationError> {
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::new(path, format!("{path} must be an object")))?;

    for required in &schema.required {
        if !object.contains_key(required) {
            return Err(ValidationError::new(
                path,
                format!("{path} is missing required field {required:?}"),
            ));
        }
    }

    if let Some(properties) = &schema.properties {
        if !schema.allows_additional_properties() {
            for key in object.keys() {
                if !properties.contains_key(key) {
                    return Err(ValidationError::new(
                        path,
                        format!("{path} has unexpected field {key:?}"),
                    ));
                }
            }
        }
        for (key, prop_schema) in properties {
            if let Some(prop_value) = object.get(key) {
                validate_value(prop_schema, prop_value, &format!("{path}.{key}"), patterns)?;
            }
        }
    }

    Ok(())
}

fn validate_array(
    schema: &Schema,
    value: &Value,
    path: &str,
    patterns: &PatternCache,
) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| ValidationError::new(path, format!("{path} must be an array")))?;
    if let Some(item_schema) = &schema.items {
        for (i, item) in items.iter().enumerate() {
            validate_value(item_schema, item, &format!("{path}[{i}]"), patterns)?;
        }
    }
    Ok(())
}

fn validate_string(
    schema: &Schema,
    value: &Value,
    path: &str,
    patterns: &PatternCache,
) -> Result<(), ValidationError> {
    let s = value
        .as_str()
        .ok_or_else(|| ValidationError::new(path, format!("{path} must be a string")))?;

    if let Some(enum_values) = &schema.enum_values {
        if !enum_values.iter().any(|v| v == value) {
            return Err(ValidationError::new(
                path,
                format!("{path} must be one of {enum_values:?}"),
            ));
        }
    }

    if let Some(pattern) = &schema.pattern {
        let matches = match patterns.get(pattern) {
            Some(regex) => regex.is_match(s),
            None => Regex::new(pattern).map(|r| r.is_match(s)).unwrap_or(false),
        };
        if !matches {
            return Err(ValidationError::new(
                path,
                format!("{path} does not match pattern {pattern:?}"),
            ));
        }
    }

    if let Some(format) = schema.format {
        validate_format(s, format, path)?;
    }

    Ok(())
}

fn validate_format(s: &str, format: SchemaFormat, path: &str) -> Result<(), ValidationError> {
    match format {
        SchemaFormat::DateTime => DateTime::parse_from_rfc3339(s)
            .map(|_| ())
            .map_err(|_| ValidationError::new(path, format!("{path} is not a valid RFC3339 date-time"))),
        SchemaFormat::Uuid => Uuid::parse_str(s)
            .map(|_| ())
            .map_err(|_| ValidationError::new(path, format!("{path} is not a valid uuid"))),
        SchemaFormat::Uri => {
            if s.contains("://") {
                Ok(())
            } else {
                Err(ValidationError::new(path, format!("{path} is not a valid uri")))
            }
        }
    }
}

fn validate_integer(value: &Value, path: &str) -> Result<(), ValidationError> {
    if value.is_i64() || value.is_u64() {
        Ok(())
    } else {
        Err(ValidationError::new(path, format!("{path} must be an integer")))
    }
}

fn validate_number(value: &Value, path: &str) -> Result<(), ValidationError> {
    if value.is_number() {
        Ok(())
    } else {
        Err(ValidationError::new(path, format!("{path} must be a number")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn string() -> Schema {
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

    #[test]
    fn integer_rejects_floats() {
        assert!(validate_integer(&json!(1.5), "$.x").is_err());
        assert!(validate_integer(&json!(3), "$.x").is_ok());
    }

    #[test]
    fn uuid_format_validates() {
        let mut s = string();
        s.format = Some(SchemaFormat::Uuid);
        let patterns = PatternCache::default();
        assert!(validate_string(&s, &json!("not-a-uuid"), "$.id", &patterns).is_err());
        assert!(validate_string(&s, &json!(Uuid::new_v4().to_string()), "$.id", &patterns).is_ok());
    }

    #[test]
    fn additional_properties_false_rejects_unknown_keys() {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), string());
        let schema = Schema {
            schema_type: SchemaType::Object,
            description: None,
            properties: Some(props),
            required: vec!["name".into()],
            items: None,
            enum_values: None,
            pattern: None,
            format: None,
            additional_properties: Some(false),
        };
        let patterns = PatternCache::default();
        assert!(validate_value(&schema, &json!({"name": "x", "extra": 1}), "$", &patterns).is_err());
        assert!(validate_value(&schema, &json!({"name": "x"}), "$", &patterns).is_ok());
    }

    #[test]
    fn pattern_cache_compiles_and_reuses_phone_pattern() {
        let mut s = string();
        s.pattern = Some(r"^\+?[0-9]{8,15}$".to_string());
        let mut patterns = PatternCache::default();
        patterns.ingest(&s).unwrap();
        assert!(validate_string(&s, &json!("+61400000001"), "$.phone", &patterns).is_ok());
        assert!(validate_string(&s, &json!("not-a-phone"), "$.phone", &patterns).is_err());
    }
}
