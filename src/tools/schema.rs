//! Best-effort argument validation against a tool's input schema.
//!
//! Checks, in order:
//!
//! 1. **Shape** – arguments must be an object (or null, treated as `{}`).
//! 2. **Required parameters** – present and non-null.
//! 3. **Unknown parameters** – rejected only when the schema sets
//!    `additionalProperties: false`.
//! 4. **Types and enums** – per declared property, without coercion.
//!
//! A missing or empty schema accepts anything.

use std::fmt::Write as _;

use serde_json::{Map, Value};

/// One problem with the supplied arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationViolation {
    /// Offending parameter (empty for top-level issues)
    pub param: String,
    /// What is wrong
    pub message: String,
}

impl ValidationViolation {
    fn new(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: message.into(),
        }
    }
}

/// Validate `arguments` against `input_schema`, returning every violation found.
#[must_use]
pub fn validate_arguments(arguments: &Value, input_schema: &Value) -> Vec<ValidationViolation> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return vec![ValidationViolation::new(
                "",
                format!("arguments must be a JSON object, got {}", json_type_name(other)),
            )];
        }
    };

    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut violations = Vec::new();

    let required = input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    for name in required {
        match args.get(name) {
            None => violations.push(ValidationViolation::new(name, "required parameter is missing")),
            Some(Value::Null) => violations.push(ValidationViolation::new(
                name,
                "required parameter must not be null",
            )),
            Some(_) => {}
        }
    }

    let closed = input_schema.get("additionalProperties") == Some(&Value::Bool(false));
    if closed {
        for key in args.keys().filter(|k| !properties.contains_key(k.as_str())) {
            let known: Vec<&str> = properties.keys().map(String::as_str).collect();
            violations.push(ValidationViolation::new(
                key,
                format!("unknown parameter; valid parameters are: {}", known.join(", ")),
            ));
        }
    }

    for (name, prop) in properties {
        let Some(value) = args.get(name).filter(|v| !v.is_null()) else {
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(value, expected) {
                violations.push(ValidationViolation::new(
                    name,
                    format!("expected {expected}, got {}", json_type_name(value)),
                ));
                continue;
            }
        }
        if let Some(options) = prop.get("enum").and_then(Value::as_array) {
            if !options.contains(value) {
                let shown: Vec<String> = options.iter().map(Value::to_string).collect();
                violations.push(ValidationViolation::new(
                    name,
                    format!("must be one of: {}", shown.join(", ")),
                ));
            }
        }
    }

    violations
}

/// Render violations as one message for the caller
#[must_use]
pub fn format_error(violations: &[ValidationViolation]) -> String {
    let mut out = String::new();
    for (i, v) in violations.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        if v.param.is_empty() {
            out.push_str(&v.message);
        } else {
            let _ = write!(out, "'{}': {}", v.param, v.message);
        }
    }
    out
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
