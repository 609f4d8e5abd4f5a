// src/tools/mod.rs
//! Tool invocation markup support.
//!
//! This module turns `<function_calls>` markup found in streamed text into
//! structured invocations, and carries the tool definitions used to validate
//! them before execution.

pub mod coerce;
pub mod helpers;
pub mod matcher;
pub mod notation;
pub mod parser;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Malformed structural or notation text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed notation at {position}: {message} (near `{fragment}`)")]
    Notation {
        fragment: String,
        position: usize,
        message: String,
    },

    #[error("cannot encode schema: {0}")]
    Unsupported(String),
}

impl ParseError {
    pub fn notation(fragment: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        ParseError::Notation {
            fragment: fragment.into(),
            position,
            message: message.into(),
        }
    }

    /// The offending fragment, if the error carries one.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            ParseError::Notation { fragment, .. } => Some(fragment),
            ParseError::Unsupported(_) => None,
        }
    }
}

/// Declared type of a `<parameter type="...">` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Json,
}

impl ParamType {
    /// Map a `type` attribute onto a declared type. Unknown names yield `None`
    /// so the value falls back to auto-detection.
    pub fn from_attr(attr: &str) -> Option<Self> {
        match attr.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(ParamType::String),
            "number" | "integer" | "int" | "float" | "double" => Some(ParamType::Number),
            "boolean" | "bool" => Some(ParamType::Boolean),
            "json" | "object" | "array" => Some(ParamType::Json),
            _ => None,
        }
    }
}

/// Finalized, immutable form of a block, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub function_name: String,
    pub call_id: String,
    pub args: Map<String, Value>,
    pub content_signature: String,
}

impl Invocation {
    pub fn new(function_name: impl Into<String>, call_id: impl Into<String>, args: Map<String, Value>) -> Self {
        let function_name = function_name.into();
        let content_signature = crate::core::signature(&function_name, &args);
        Self {
            function_name,
            call_id: call_id.into(),
            args,
            content_signature,
        }
    }
}

/// A tool the host knows how to execute, with its JSON Schema parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

/// Builder for creating tool definitions
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolBuilder {
    fn new(name: String, description: String) -> Self {
        Self {
            name,
            description,
            parameters: empty_object_schema(),
        }
    }

    /// Add a parameter to the function
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if let Some(props) = self.parameters.get_mut("properties") {
            props[&name] = serde_json::json!({
                "type": param_type.into(),
                "description": description.into()
            });
        }
        if required {
            if let Some(arr) = self.parameters.get_mut("required").and_then(Value::as_array_mut) {
                arr.push(Value::String(name));
            }
        }
        self
    }

    /// Set custom parameters schema
    pub fn parameters_schema(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn build(self) -> ToolDefinition {
        ToolDefinition {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
        }
    }
}

/// Create a new function tool builder.
pub fn function_tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name.into(), description.into())
}

/// Generate a compact call id with the `call_` prefix, used when the markup
/// does not carry a `call_id` attribute.
pub fn generate_call_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("call_{}", &raw[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_from_attr() {
        assert_eq!(ParamType::from_attr("number"), Some(ParamType::Number));
        assert_eq!(ParamType::from_attr(" Integer "), Some(ParamType::Number));
        assert_eq!(ParamType::from_attr("BOOLEAN"), Some(ParamType::Boolean));
        assert_eq!(ParamType::from_attr("json"), Some(ParamType::Json));
        assert_eq!(ParamType::from_attr("string"), Some(ParamType::String));
        assert_eq!(ParamType::from_attr("uuid"), None);
    }

    #[test]
    fn test_generate_call_id() {
        let id = generate_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 16);
        assert_ne!(id, generate_call_id());
    }

    #[test]
    fn test_tool_builder() {
        let tool = function_tool("search", "Search the web")
            .param("q", "string", "query", true)
            .param("limit", "integer", "max results", false)
            .build();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.parameters["properties"]["q"]["type"], "string");
        assert_eq!(tool.parameters["required"], serde_json::json!(["q"]));
    }

    #[test]
    fn test_tool_definition_defaults() {
        let tool: ToolDefinition = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.parameters["type"], "object");
    }
}
