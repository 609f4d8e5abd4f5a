// src/tools/schema.rs
//! JSON Schema utilities for tool parameters
//!
//! Builds parameter schemas and checks parsed arguments against them before a
//! tool is invoked. Only the subset tool definitions actually use is checked:
//! required fields, primitive types and enums.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required argument '{0}'")]
    MissingRequired(String),

    #[error("argument '{name}' should be {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: &'static str,
    },

    #[error("argument '{name}' must be one of {allowed}, got {value}")]
    NotInEnum {
        name: String,
        allowed: String,
        value: String,
    },
}

/// Builder for creating JSON Schema objects
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    properties: BTreeMap<String, Value>,
    required: Vec<String>,
    description: Option<String>,
    additional_properties: Option<bool>,
}

impl SchemaBuilder {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add a property of a primitive JSON Schema type
    pub fn prop(
        self,
        name: impl Into<String>,
        prop_type: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = json!({ "type": prop_type, "description": description.into() });
        self.custom_prop(name, schema, required)
    }

    pub fn string_prop(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.prop(name, "string", description, required)
    }

    pub fn integer_prop(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.prop(name, "integer", description, required)
    }

    pub fn boolean_prop(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.prop(name, "boolean", description, required)
    }

    /// Add a string property restricted to `values`
    pub fn enum_prop(
        self,
        name: impl Into<String>,
        values: &[&str],
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = json!({
            "type": "string",
            "enum": values,
            "description": description.into()
        });
        self.custom_prop(name, schema, required)
    }

    pub fn custom_prop(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn no_additional_properties(mut self) -> Self {
        self.additional_properties = Some(false);
        self
    }

    pub fn build(self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required
        });
        if let Some(desc) = self.description {
            schema["description"] = json!(desc);
        }
        if let Some(additional) = self.additional_properties {
            schema["additionalProperties"] = json!(additional);
        }
        schema
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // unknown type names are not checked
        _ => true,
    }
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// A scalar that auto-detection turned into a number or boolean goes back to
/// its text when the schema asks for a string.
fn normalize_for_schema(value: Value, types: &[&str]) -> Value {
    if types.len() == 1 && types[0] == "string" {
        match value {
            Value::Number(n) => return Value::String(n.to_string()),
            Value::Bool(b) => return Value::String(b.to_string()),
            other => return other,
        }
    }
    value
}

/// Check `args` against an object schema and return the arguments to invoke
/// with. Properties the schema does not declare are dropped with a warning.
pub fn validate_arguments(
    tool: &str,
    args: &Map<String, Value>,
    schema: &Value,
) -> Result<Map<String, Value>, SchemaError> {
    let props = schema.get("properties").and_then(Value::as_object);
    let mut validated = Map::new();

    for (key, value) in args {
        let Some(props) = props else {
            validated.insert(key.clone(), value.clone());
            continue;
        };
        let Some(prop_schema) = props.get(key) else {
            crate::log_warn!("Dropping undeclared argument '{}' for tool '{}'", key, tool);
            continue;
        };

        let types = declared_types(prop_schema);
        let value = normalize_for_schema(value.clone(), &types);
        if !types.is_empty() && !types.iter().any(|t| matches_type(&value, t)) {
            return Err(SchemaError::TypeMismatch {
                name: key.clone(),
                expected: types.join(" or "),
                found: kind_of(&value),
            });
        }
        if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(&value) {
                return Err(SchemaError::NotInEnum {
                    name: key.clone(),
                    allowed: Value::Array(allowed.clone()).to_string(),
                    value: value.to_string(),
                });
            }
        }
        validated.insert(key.clone(), value);
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !validated.contains_key(name) {
                return Err(SchemaError::MissingRequired(name.to_string()));
            }
        }
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_schema() -> Value {
        SchemaBuilder::object()
            .description("Search the web for information")
            .string_prop("query", "The search query", true)
            .integer_prop("max_results", "Maximum number of results to return", false)
            .enum_prop("engine", &["web", "news"], "Backend", false)
            .build()
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_builder_output() {
        let schema = search_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], json!(["query"]));
        let strict = SchemaBuilder::object().no_additional_properties().build();
        assert_eq!(strict["additionalProperties"], false);
    }

    #[test]
    fn test_valid_arguments_pass() {
        let out = validate_arguments(
            "search",
            &args(json!({"query": "rust", "max_results": 5, "engine": "news"})),
            &search_schema(),
        )
        .unwrap();
        assert_eq!(out["max_results"], 5);
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments("search", &args(json!({"max_results": 5})), &search_schema()).unwrap_err();
        assert_eq!(err, SchemaError::MissingRequired("query".into()));
    }

    #[test]
    fn test_type_mismatch() {
        let err = validate_arguments(
            "search",
            &args(json!({"query": "rust", "max_results": "many"})),
            &search_schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { ref name, found: "string", .. } if name == "max_results"));
    }

    #[test]
    fn test_enum_violation() {
        let err = validate_arguments(
            "search",
            &args(json!({"query": "rust", "engine": "images"})),
            &search_schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::NotInEnum { .. }));
    }

    #[test]
    fn test_unknown_properties_dropped() {
        let out = validate_arguments(
            "search",
            &args(json!({"query": "rust", "verbose": true})),
            &search_schema(),
        )
        .unwrap();
        assert!(!out.contains_key("verbose"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_detected_number_becomes_string() {
        let out = validate_arguments("search", &args(json!({"query": 12345})), &search_schema()).unwrap();
        assert_eq!(out["query"], "12345");
    }

    #[test]
    fn test_schema_without_properties_keeps_everything() {
        let out = validate_arguments("any", &args(json!({"a": 1})), &json!({"type": "object"})).unwrap();
        assert_eq!(out["a"], 1);
    }
}
