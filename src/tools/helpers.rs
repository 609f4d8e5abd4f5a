// src/tools/helpers.rs
//! Helper functions for invocation processing.
//!
//! These functions handle schema mapping, pre-invoke validation and logging.

use super::schema::validate_arguments;
use super::{Invocation, ToolDefinition};
use crate::invoker::InvocationError;
use ahash::AHashMap;
use serde_json::Value;

/// Build a map of tool names to their parameter schemas
pub fn build_tool_schema_map(tools: &[ToolDefinition]) -> AHashMap<String, Value> {
    tools
        .iter()
        .map(|tool| (tool.name.clone(), tool.parameters.clone()))
        .collect()
}

/// Validate an invocation against the known tools. With no tools registered
/// every invocation passes unchanged. Dropping undeclared arguments yields a
/// new invocation with a recomputed signature.
pub fn validate_invocation(
    invocation: &Invocation,
    schemas: &AHashMap<String, Value>,
) -> Result<Invocation, InvocationError> {
    if schemas.is_empty() {
        return Ok(invocation.clone());
    }
    let Some(schema) = schemas.get(&invocation.function_name) else {
        crate::log_warn!(
            "Tool '{}' not found in schema map. Available tools: {:?}",
            invocation.function_name,
            schemas.keys().collect::<Vec<_>>()
        );
        return Err(InvocationError::Tool(format!(
            "unknown tool '{}'",
            invocation.function_name
        )));
    };
    let args = validate_arguments(&invocation.function_name, &invocation.args, schema)
        .map_err(|e| InvocationError::Tool(format!("{}: {}", invocation.function_name, e)))?;
    if args == invocation.args {
        return Ok(invocation.clone());
    }
    Ok(Invocation::new(
        invocation.function_name.clone(),
        invocation.call_id.clone(),
        args,
    ))
}

/// Format invocations for logging - returns a summary string
pub fn format_invocations_summary(invocations: &[Invocation]) -> String {
    invocations
        .iter()
        .map(|inv| {
            let args = Value::Object(inv.args.clone()).to_string().replace('\n', " ");
            let truncated = if args.chars().count() > 160 {
                let snippet: String = args.chars().take(160).collect();
                format!("{}...", snippet)
            } else {
                args
            };
            format!("{}#{}(args={})", inv.function_name, inv.call_id, truncated)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn log_invocations(label: &str, invocations: &[Invocation]) {
    if invocations.is_empty() {
        return;
    }
    crate::log_info!(
        "{} invocation(s): {}",
        label,
        format_invocations_summary(invocations)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::function_tool;
    use serde_json::json;

    fn invocation(args: Value) -> Invocation {
        Invocation::new("search", "call_1", args.as_object().cloned().unwrap())
    }

    fn schemas() -> AHashMap<String, Value> {
        build_tool_schema_map(&[function_tool("search", "desc")
            .param("query", "string", "the query", true)
            .build()])
    }

    #[test]
    fn test_build_tool_schema_map() {
        let map = schemas();
        assert!(map.contains_key("search"));
        assert_eq!(map["search"]["required"], json!(["query"]));
    }

    #[test]
    fn test_empty_registry_skips_validation() {
        let inv = invocation(json!({"anything": 1}));
        assert_eq!(validate_invocation(&inv, &AHashMap::new()).unwrap(), inv);
    }

    #[test]
    fn test_unknown_tool_is_tool_error() {
        let inv = Invocation::new("delete_all", "c", Default::default());
        assert!(matches!(
            validate_invocation(&inv, &schemas()),
            Err(InvocationError::Tool(_))
        ));
    }

    #[test]
    fn test_schema_failure_is_tool_error() {
        let err = validate_invocation(&invocation(json!({})), &schemas()).unwrap_err();
        assert_eq!(
            err,
            InvocationError::Tool("search: missing required argument 'query'".into())
        );
    }

    #[test]
    fn test_dropped_argument_changes_signature() {
        let inv = invocation(json!({"query": "rust", "extra": true}));
        let out = validate_invocation(&inv, &schemas()).unwrap();
        assert!(!out.args.contains_key("extra"));
        assert_ne!(out.content_signature, inv.content_signature);
        assert_eq!(out.call_id, "call_1");
    }

    #[test]
    fn test_format_summary() {
        let inv = invocation(json!({"query": "x".repeat(300)}));
        let summary = format_invocations_summary(&[inv]);
        assert!(summary.starts_with("search#call_1(args="));
        assert!(summary.ends_with("...)"));
    }
}
