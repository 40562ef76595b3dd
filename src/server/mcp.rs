//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::{
    handle_tool_call, SharedState, TOOL_ADMISSION_STATS, TOOL_GET_GRAPH, TOOL_INSERT_THOUGHT,
    TOOL_INVALIDATE, TOOL_QUERY,
};
use crate::storage::{Invocation, Storage};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null when the request carried none).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Reads one JSON-RPC 2.0 message per line from stdin and writes responses
/// to stdout. One request runs to completion before the next is read.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP Deliberation Server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response per JSON-RPC 2.0
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    ///
    /// Returns None for notifications (requests without id).
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "mcp-deliberation".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        let tools = tool_definitions();

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": tools
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let start = Instant::now();
        let input = params.arguments.clone().unwrap_or(Value::Null);
        let outcome = handle_tool_call(&self.state, &params.name, params.arguments).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        self.log_invocation(&params.name, input, &outcome, latency_ms)
            .await;

        let (content, is_error) = match outcome {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                    error!(error = %e, "Failed to serialize tool result");
                    format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                });
                (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text,
                    },
                    None,
                )
            }
            Err(e) => (
                ToolResultContent {
                    content_type: "text".to_string(),
                    text: format!("Error: {}", e),
                },
                Some(true),
            ),
        };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Record the call in the invocation audit trail, fire-and-forget.
    async fn log_invocation(
        &self,
        tool_name: &str,
        input: Value,
        outcome: &Result<Value, crate::error::McpError>,
        latency_ms: i64,
    ) {
        let invocation = Invocation::new(&self.state.session_id, tool_name, input);
        let invocation = match outcome {
            Ok(result) => invocation.success(result.clone(), latency_ms),
            Err(e) => invocation.failure(e.to_string(), latency_ms),
        };

        if let Err(e) = self.state.storage.log_invocation(&invocation).await {
            warn!(error = %e, tool = %tool_name, "Failed to log invocation");
        }
    }
}

/// Definitions of all served tools, in the order they are advertised.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        get_insert_thought_tool(),
        get_graph_tool(),
        get_invalidate_tool(),
        get_query_tool(),
        get_admission_stats_tool(),
    ]
}

/// Get the insert_thought tool definition
fn get_insert_thought_tool() -> Tool {
    Tool {
        name: TOOL_INSERT_THOUGHT.to_string(),
        description: "Record a typed thought in the deliberation graph. Dependencies must reference existing thoughts and may not close a cycle.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The statement text"
                },
                "type": {
                    "type": "string",
                    "enum": ["objective", "hypothesis", "assumption", "question", "sub_problem", "evidence", "action", "synthesis", "critique"],
                    "description": "Semantic role of the thought"
                },
                "dependencies": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ids of thoughts this one rests on, in order"
                },
                "confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Optional confidence (0.0-1.0)"
                },
                "action_request": {
                    "type": "object",
                    "properties": {
                        "tool": { "type": "string" },
                        "params": { "type": "object" }
                    },
                    "required": ["tool"],
                    "description": "Optional tool invocation requested by this thought"
                }
            },
            "required": ["content", "type"],
            "additionalProperties": false
        }),
    }
}

/// Get the get_graph tool definition
fn get_graph_tool() -> Tool {
    Tool {
        name: TOOL_GET_GRAPH.to_string(),
        description: "Read the session graph, either every thought (full) or aggregate counts (summary).".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["full", "summary"],
                    "description": "Result shape (default: full)"
                }
            },
            "additionalProperties": false
        }),
    }
}

/// Get the invalidate tool definition
fn get_invalidate_tool() -> Tool {
    Tool {
        name: TOOL_INVALIDATE.to_string(),
        description: "Invalidate an assumption. Everything transitively resting on it is marked stale and a critique thought records the reason.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Id of the assumption to invalidate"
                },
                "reason": {
                    "type": "string",
                    "description": "Why the assumption no longer holds"
                }
            },
            "required": ["id", "reason"],
            "additionalProperties": false
        }),
    }
}

/// Get the query tool definition
fn get_query_tool() -> Tool {
    Tool {
        name: TOOL_QUERY.to_string(),
        description: "Filter, sort, and paginate thoughts. Filters compose conjunctively; each result carries its dependency count and dependents.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["objective", "hypothesis", "assumption", "question", "sub_problem", "evidence", "action", "synthesis", "critique"],
                    "description": "Exact thought type"
                },
                "status": {
                    "type": "string",
                    "enum": ["active", "stale"],
                    "description": "Exact status"
                },
                "content": {
                    "type": "string",
                    "description": "Case-insensitive substring of content"
                },
                "min_confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Lower confidence bound"
                },
                "max_confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Upper confidence bound"
                },
                "dependency_of": {
                    "type": "string",
                    "description": "Match thoughts this thought depends on"
                },
                "depends_on": {
                    "type": "string",
                    "description": "Match thoughts depending on this id"
                },
                "sort": {
                    "type": "string",
                    "enum": ["recent", "by_confidence", "by_type", "by_content", "by_dependency"],
                    "description": "Ordering (default: recent)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 100,
                    "description": "Page size (default: 20)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Items to skip after sorting"
                }
            },
            "additionalProperties": false
        }),
    }
}

/// Get the admission_stats tool definition
fn get_admission_stats_tool() -> Tool {
    Tool {
        name: TOOL_ADMISSION_STATS.to_string(),
        description: "Report token-bucket state and the current request-window count for an operation class.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "Operation class to report on"
                }
            },
            "required": ["operation"],
            "additionalProperties": false
        }),
    }
}
