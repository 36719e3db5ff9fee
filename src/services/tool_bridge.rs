//! Remote tool invocation.
//!
//! [`McpHttpBridge`] speaks JSON-RPC 2.0 (`tools/list`, `tools/call`) over
//! HTTP POST to one tool server. [`ToolRouter`] puts several servers behind a
//! single bridge.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ToolCallError;
use crate::models::{ToolCall, ToolServerConfig, ToolSpec};

/// Successful tool output: flattened text plus the raw result object.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub payload: Value,
}

#[async_trait]
pub trait ToolBridge: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolCallError>;

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolOutput, ToolCallError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// Check `call` against the schema's `required` list.
pub fn check_arguments(spec: &ToolSpec, call: &ToolCall) -> Result<(), ToolCallError> {
    let missing: Vec<&str> = spec
        .required_arguments()
        .into_iter()
        .filter(|name| call.arguments.get(*name).is_none_or(Value::is_null))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolCallError::InvalidArguments {
            tool: call.name.clone(),
            reason: format!("missing required argument(s): {}", missing.join(", ")),
        })
    }
}

/// Unwrap a JSON-RPC envelope; bare bodies pass through unchanged.
fn unwrap_envelope(body: Value) -> Result<Value, ToolCallError> {
    let Value::Object(mut map) = body else {
        return Err(ToolCallError::Protocol("response is not a JSON object".to_string()));
    };
    if let Some(error) = map.remove("error") {
        let message = match &error {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| other.to_string(), str::to_string),
        };
        return Err(ToolCallError::Protocol(message));
    }
    match map.remove("result") {
        Some(result) if map.contains_key("jsonrpc") => Ok(result),
        Some(result) => {
            map.insert("result".to_string(), result);
            Ok(Value::Object(map))
        }
        None => Ok(Value::Object(map)),
    }
}

/// Join the `text` parts of an MCP `content` array.
fn flatten_content(result: &Value) -> String {
    match result.get("content").and_then(Value::as_array) {
        Some(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => match result.get("result") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => result.to_string(),
        },
    }
}

/// One MCP server reached over HTTP.
pub struct McpHttpBridge {
    client: Client,
    url: String,
    timeout_secs: u64,
    next_id: AtomicU64,
    tools: RwLock<Option<Vec<ToolSpec>>>,
}

impl McpHttpBridge {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, ToolCallError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ToolCallError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout_secs,
            next_id: AtomicU64::new(1),
            tools: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ToolCallError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let send = async {
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| ToolCallError::Transport(e.to_string()))?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| ToolCallError::Protocol(format!("{status}: {e}")))?;
            if !status.is_success() && body.get("error").is_none() {
                return Err(ToolCallError::Transport(format!("server returned {status}")));
            }
            Ok(body)
        };

        let body = tokio::time::timeout(Duration::from_secs(self.timeout_secs), send)
            .await
            .map_err(|_| ToolCallError::Timeout(self.timeout_secs))??;
        unwrap_envelope(body)
    }

    async fn spec_for(&self, name: &str) -> Result<ToolSpec, ToolCallError> {
        if self.tools.read().await.is_none() {
            self.list_tools().await?;
        }
        self.tools
            .read()
            .await
            .as_ref()
            .and_then(|tools| tools.iter().find(|t| t.name == name).cloned())
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))
    }
}

#[async_trait]
impl ToolBridge for McpHttpBridge {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolCallError> {
        let result = self.rpc("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| ToolCallError::Protocol("tools/list response has no 'tools'".to_string()))?;
        let tools: Vec<ToolSpec> =
            serde_json::from_value(tools).map_err(|e| ToolCallError::Protocol(e.to_string()))?;
        debug!(url = %self.url, count = tools.len(), "listed tools");
        *self.tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolOutput, ToolCallError> {
        let spec = self.spec_for(&call.name).await?;
        check_arguments(&spec, call)?;

        let result = self
            .rpc(
                "tools/call",
                json!({ "name": call.name, "arguments": call.arguments }),
            )
            .await?;

        let text = flatten_content(&result);
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolCallError::Remote(text));
        }
        Ok(ToolOutput {
            text,
            payload: result,
        })
    }
}

/// Several named tool servers behind one bridge. A tool name routes to the
/// first server that lists it.
pub struct ToolRouter {
    servers: Vec<(String, Arc<dyn ToolBridge>)>,
    routes: RwLock<HashMap<String, usize>>,
}

impl ToolRouter {
    pub fn new(servers: Vec<(String, Arc<dyn ToolBridge>)>) -> Self {
        Self {
            servers,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(
        servers: &[ToolServerConfig],
        timeout_secs: u64,
    ) -> Result<Self, ToolCallError> {
        let bridges = servers
            .iter()
            .map(|s| {
                let bridge: Arc<dyn ToolBridge> = Arc::new(McpHttpBridge::new(&s.url, timeout_secs)?);
                Ok((s.name.clone(), bridge))
            })
            .collect::<Result<Vec<_>, ToolCallError>>()?;
        Ok(Self::new(bridges))
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// List every server's tools, tagging each with its server. Unreachable
    /// servers are skipped.
    pub async fn list_by_server(&self) -> Vec<(String, Result<Vec<ToolSpec>, ToolCallError>)> {
        let mut out = Vec::with_capacity(self.servers.len());
        for (name, bridge) in &self.servers {
            let listed = bridge.list_tools().await.map(|tools| {
                tools
                    .into_iter()
                    .map(|mut t| {
                        t.server = Some(name.clone());
                        t
                    })
                    .collect()
            });
            out.push((name.clone(), listed));
        }
        out
    }
}

#[async_trait]
impl ToolBridge for ToolRouter {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolCallError> {
        let mut tools: Vec<ToolSpec> = Vec::new();
        let mut routes = HashMap::new();

        for (index, (name, listed)) in self.list_by_server().await.into_iter().enumerate() {
            match listed {
                Ok(specs) => {
                    for spec in specs {
                        if routes.contains_key(&spec.name) {
                            continue;
                        }
                        routes.insert(spec.name.clone(), index);
                        tools.push(spec);
                    }
                }
                Err(e) => warn!(server = %name, error = %e, "tool server unavailable"),
            }
        }

        *self.routes.write().await = routes;
        Ok(tools)
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolOutput, ToolCallError> {
        if !self.routes.read().await.contains_key(&call.name) {
            self.list_tools().await?;
        }
        let index = self
            .routes
            .read()
            .await
            .get(&call.name)
            .copied()
            .ok_or_else(|| ToolCallError::UnknownTool(call.name.clone()))?;
        let (server, bridge) = &self.servers[index];
        debug!(server = %server, tool = %call.name, "routing tool call");
        bridge.call_tool(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    struct StaticBridge {
        tools: Vec<&'static str>,
        reply: &'static str,
    }

    #[async_trait]
    impl ToolBridge for StaticBridge {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolCallError> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolSpec {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({}),
                    server: None,
                })
                .collect())
        }

        async fn call_tool(&self, _call: &ToolCall) -> Result<ToolOutput, ToolCallError> {
            Ok(ToolOutput {
                text: self.reply.to_string(),
                payload: Value::Null,
            })
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_check_arguments() {
        let spec: ToolSpec = serde_json::from_value(json!({
            "name": "search_web",
            "parameters": {"type": "object", "required": ["query"]}
        }))
        .unwrap();
        assert!(check_arguments(&spec, &ToolCall::new("search_web", args(json!({"query": "x"})))).is_ok());
        let err = check_arguments(&spec, &ToolCall::new("search_web", Map::new())).unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidArguments { .. }));
        let err = check_arguments(&spec, &ToolCall::new("search_web", args(json!({"query": null})))).unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_unwrap_envelope() {
        let rpc = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}});
        assert_eq!(unwrap_envelope(rpc).unwrap(), json!({"tools": []}));

        let bare = json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(unwrap_envelope(bare.clone()).unwrap(), bare);

        let rpc_err = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}});
        assert!(matches!(unwrap_envelope(rpc_err), Err(ToolCallError::Protocol(m)) if m == "no such method"));

        let bare_err = json!({"error": "Unknown method: x"});
        assert!(matches!(unwrap_envelope(bare_err), Err(ToolCallError::Protocol(_))));
        assert!(unwrap_envelope(json!([1, 2])).is_err());
    }

    #[test]
    fn test_flatten_content() {
        let result = json!({"content": [{"type": "text", "text": "a"}, {"type": "image"}, {"type": "text", "text": "b"}]});
        assert_eq!(flatten_content(&result), "a\nb");
        assert_eq!(flatten_content(&json!({"success": true, "result": "plain"})), "plain");
    }

    #[tokio::test]
    async fn test_router_first_listing_wins() {
        let first: Arc<dyn ToolBridge> = Arc::new(StaticBridge {
            tools: vec!["search_web", "get_time"],
            reply: "first",
        });
        let second: Arc<dyn ToolBridge> = Arc::new(StaticBridge {
            tools: vec!["search_web", "calculate"],
            reply: "second",
        });
        let router = ToolRouter::new(vec![("a".to_string(), first), ("b".to_string(), second)]);

        let tools = router.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_web", "get_time", "calculate"]);
        assert_eq!(tools[0].server.as_deref(), Some("a"));

        let out = router.call_tool(&ToolCall::new("search_web", Map::new())).await.unwrap();
        assert_eq!(out.text, "first");
        let out = router.call_tool(&ToolCall::new("calculate", Map::new())).await.unwrap();
        assert_eq!(out.text, "second");
        assert!(matches!(
            router.call_tool(&ToolCall::new("missing", Map::new())).await,
            Err(ToolCallError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let bridge = McpHttpBridge::new("http://127.0.0.1:9/mcp", 2).unwrap();
        let err = bridge.list_tools().await.unwrap_err();
        assert!(matches!(err, ToolCallError::Transport(_) | ToolCallError::Timeout(_)));
    }
}
