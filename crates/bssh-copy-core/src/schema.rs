//! Versioned JSON schemas for draft completeness checks.
//!
//! Supports the JSON Schema keywords draft documents use: `type`,
//! `required`, `properties`, `items`, `enum`, `minLength`, `minItems` and
//! `pattern`. Unknown keywords are ignored.

use serde_json::{json, Map, Value};

use crate::error::{CopyError, Result};

/// A fetched schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub version: String,
    document: Value,
}

impl Schema {
    /// Wrap a schema document. The root must be an object.
    pub fn new(name: impl Into<String>, version: impl Into<String>, document: Value) -> Result<Self> {
        let name = name.into();
        if !document.is_object() {
            return Err(CopyError::SchemaFetchFailure(format!(
                "schema {} is not a JSON object",
                name
            )));
        }
        Ok(Self {
            name,
            version: version.into(),
            document,
        })
    }

    /// Built-in schema for draft payload data.
    pub fn default_draft(name: impl Into<String>, version: impl Into<String>) -> Self {
        let document = json!({
            "type": "object",
            "required": ["tags", "inputs", "engineParameters"],
            "properties": {
                "tags": {
                    "type": "object",
                    "required": ["instrumentRunId"],
                    "properties": {"instrumentRunId": {"type": "string", "minLength": 1}}
                },
                "inputs": {
                    "type": "object",
                    "required": ["instrumentRunId", "bsshProjectId", "bsshAnalysisId"],
                    "properties": {
                        "instrumentRunId": {"type": "string", "minLength": 1},
                        "bsshProjectId": {"type": "string", "minLength": 1},
                        "bsshAnalysisId": {"type": "string", "minLength": 1}
                    }
                },
                "engineParameters": {
                    "type": "object",
                    "required": ["outputUri"],
                    "properties": {
                        "outputUri": {"type": "string", "pattern": "^(s3|icav2)://.+/$"}
                    }
                }
            }
        });
        Self {
            name: name.into(),
            version: version.into(),
            document,
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate an instance. Returns every violation found, empty if valid.
    pub fn validate(&self, instance: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        check(&self.document, instance, "$", &mut errors);
        errors
    }

    /// Validate payload data, mapping violations to `IncompleteDraft`.
    pub fn check_data(&self, data: &Map<String, Value>) -> Result<()> {
        let errors = self.validate(&Value::Object(data.clone()));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CopyError::IncompleteDraft(errors.join("; ")))
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(ts) => ts
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            errors.push(format!("{}: expected type {}", path, expected));
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(format!("{}: value not in enum", path));
        }
    }

    if let Value::String(s) = value {
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                errors.push(format!("{}: shorter than {}", path, min));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match regex_lite::Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => {
                    errors.push(format!("{}: does not match {}", path, pattern))
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("{}: bad pattern {}: {}", path, pattern, e)),
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                errors.push(format!("{}: fewer than {} items", path, min));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                check(item_schema, item, &format!("{}[{}]", path, i), errors);
            }
        }
    }

    if let Value::Object(map) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                match map.get(key) {
                    None | Some(Value::Null) => {
                        errors.push(format!("{}.{}: required", path, key))
                    }
                    Some(_) => {}
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, prop_schema) in properties {
                if let Some(child) = map.get(key).filter(|v| !v.is_null()) {
                    check(prop_schema, child, &format!("{}.{}", path, key), errors);
                }
            }
        }
    }
}
