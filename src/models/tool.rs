//! External tool descriptions, calls and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(
        default,
        rename = "inputSchema",
        alias = "input_schema",
        alias = "parameters"
    )]
    pub input_schema: Value,
    /// Server that exposes the tool, when routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ToolSpec {
    /// Names listed under the schema's `required` array.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// A schema without `properties` accepts any argument.
    pub fn accepts_argument(&self, name: &str) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_none_or(|props| props.contains_key(name))
    }
}

/// A named tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Identity of the call for duplicate detection.
    ///
    /// `serde_json::Map` keeps keys sorted, so equal argument sets serialize identically.
    pub fn canonical_key(&self) -> String {
        format!("{}:{}", self.name, Value::Object(self.arguments.clone()))
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { text: String, payload: Value },
    Failure { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: ToolCall, text: String, payload: Value) -> Self {
        Self {
            call,
            outcome: ToolOutcome::Success { text, payload },
        }
    }

    pub fn failure(call: ToolCall, error: impl ToString) -> Self {
        Self {
            call,
            outcome: ToolOutcome::Failure {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Success { text, .. } => Some(text),
            ToolOutcome::Failure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_canonical_key_ignores_argument_order() {
        let a = ToolCall::new("search", args(json!({"query": "x", "limit": 3})));
        let b = ToolCall::new("search", args(json!({"limit": 3, "query": "x"})));
        let c = ToolCall::new("search", args(json!({"limit": 4, "query": "x"})));
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_ne!(a.canonical_key(), c.canonical_key());
    }

    #[test]
    fn test_required_arguments() {
        let spec: ToolSpec = serde_json::from_value(json!({
            "name": "search_web",
            "description": "Search",
            "inputSchema": {
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }
        }))
        .unwrap();
        assert_eq!(spec.required_arguments(), vec!["query"]);
        assert!(spec.accepts_argument("query"));
        assert!(!spec.accepts_argument("limit"));

        let open: ToolSpec = serde_json::from_value(json!({"name": "echo"})).unwrap();
        assert!(open.accepts_argument("anything"));
    }

    #[test]
    fn test_tool_result_accessors() {
        let call = ToolCall::new("t", Map::new());
        let ok = ToolResult::success(call.clone(), "done".to_string(), json!({}));
        let err = ToolResult::failure(call, "boom");
        assert_eq!(ok.text(), Some("done"));
        assert!(err.text().is_none());
        assert!(!err.is_success());
    }
}
