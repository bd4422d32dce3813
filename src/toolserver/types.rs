//! Shared types for the tool-server subsystem.
//!
//! JSON-RPC 2.0 message types, tool descriptors, and the result envelope
//! returned by `tools/call`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── Tool Server Protocol Types ─────────────────────────────────────────────

/// Tool descriptor as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub params_schema: serde_json::Value,
}

/// `initialize` handshake acknowledgement payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerIdentity>,
}

/// Server identity returned in the initialize acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIdentity {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// One content item inside a [`ResultEnvelope`].
///
/// Tool servers return an ordered sequence of typed items; only `text`
/// and `link` are recognized, anything else is preserved raw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

/// The raw result of a `tools/call` — opaque until run through the
/// response extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl ResultEnvelope {
    /// Concatenate all `text` items in order.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            if let ContentItem::Text { text } = item {
                out.push_str(text);
            }
        }
        out
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// What kind of transport a tool server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolServerKind {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    #[default]
    Stdio,
}

/// Configuration for one tool server. Immutable once the server is
/// started — changing it requires stop + restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Unique server name (e.g., "directory", "docs").
    pub name: String,
    #[serde(default)]
    pub kind: ToolServerKind,
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-server working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Result of one tool call as surfaced to the orchestration layer.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallOutcome {
    pub server: String,
    pub tool_name: String,
    pub success: bool,
    pub envelope: Option<ResultEnvelope>,
    /// Structured payload recovered from the envelope's prose by the
    /// response extractor. Set by the orchestration layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_request_serialization() {
        let req = RpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn rpc_request_with_params() {
        let params = serde_json::json!({"name": "directory.query", "arguments": {"path": "/tmp"}});
        let req = RpcRequest::new(42, "tools/call", Some(params));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":42"));
        assert!(json.contains("tools/call"));
        assert!(json.contains("/tmp"));
    }

    #[test]
    fn rpc_response_deserialization() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}"#;
        let resp: RpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: RpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
    }

    #[test]
    fn content_items_tagged_by_type() {
        let json = r#"{"content": [
            {"type": "text", "text": "Result:"},
            {"type": "link", "url": "https://docs.example.com/a", "title": "A"}
        ]}"#;
        let envelope: ResultEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.content.len(), 2);
        assert_eq!(
            envelope.content[0],
            ContentItem::Text {
                text: "Result:".into()
            }
        );
    }

    #[test]
    fn joined_text_skips_links() {
        let envelope = ResultEnvelope {
            content: vec![
                ContentItem::Text { text: "a".into() },
                ContentItem::Link {
                    url: "https://example.com".into(),
                    title: None,
                },
                ContentItem::Text { text: "b".into() },
            ],
        };
        assert_eq!(envelope.joined_text(), "ab");
    }

    #[test]
    fn server_config_defaults() {
        let json = r#"{"name": "directory", "command": "dirserve"}"#;
        let config: ToolServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.kind, ToolServerKind::Stdio);
        assert!(config.args.is_empty());
        assert!(config.cwd.is_none());
    }
}
