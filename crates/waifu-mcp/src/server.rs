//! MCP server implementation over STDIO
//!
//! Reads JSON-RPC requests from stdin, dispatches to the gateway, writes
//! responses to stdout. Job status is reachable both as a `job_status`
//! tool call and as a `job://<id>` resource read.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, RequestGateway};
use crate::protocol::*;

const JOB_URI_SCHEME: &str = "job://";
const LOG_PREVIEW_CHARS: usize = 200;

/// First chars of a payload for debug logs
///
/// Counts chars, not bytes: payloads carry arbitrary UTF-8 and a byte
/// slice could land inside a multibyte char.
fn log_preview(payload: &str) -> String {
    payload.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// MCP server that communicates over STDIO
pub struct McpServer {
    gateway: RequestGateway,
}

impl McpServer {
    /// Create a new MCP server over a request gateway
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }

    /// Run the MCP server over STDIO (stdin/stdout)
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("MCP server starting on STDIO");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            debug!("MCP received: {}", log_preview(&line));

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Invalid JSON-RPC request: {}", e);
                    let err_response = JsonRpcResponse::error(
                        Value::Null,
                        -32700,
                        format!("Parse error: {}", e),
                    );
                    write_response(&mut stdout, &err_response).await?;
                    continue;
                }
            };

            let response = self.handle_request(request).await;

            if let Some(resp) = response {
                write_response(&mut stdout, &resp).await?;
            }
        }

        info!("MCP server STDIO closed");
        Ok(())
    }

    /// Handle a single JSON-RPC request
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: "2024-11-05".to_string(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability { list_changed: false },
                        resources: ResourcesCapability { list_changed: false },
                    },
                    server_info: ServerInfo {
                        name: "waifu-queue".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                Some(JsonRpcResponse::success(
                    id,
                    serde_json::to_value(result).unwrap(),
                ))
            }

            "notifications/initialized" => {
                info!("MCP client initialized");
                None // Notifications don't get responses
            }

            "tools/list" => Some(JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": tool_definitions() }),
            )),

            "tools/call" => {
                let name = request.params.get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let arguments = request.params.get("arguments")
                    .cloned()
                    .unwrap_or(serde_json::json!({}));

                if name.is_empty() {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "Missing 'name' parameter".to_string(),
                    ));
                }

                info!("MCP tools/call: {}", name);
                let result = self.call_tool(name, &arguments).await;
                Some(JsonRpcResponse::success(
                    id,
                    serde_json::to_value(result).unwrap(),
                ))
            }

            "resources/read" => {
                let uri = request.params.get("uri").and_then(|v| v.as_str());
                let Some(uri) = uri else {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "Missing 'uri' parameter".to_string(),
                    ));
                };
                self.read_resource(id, uri).await
            }

            "ping" => {
                Some(JsonRpcResponse::success(id, serde_json::json!({})))
            }

            _ => {
                warn!("MCP unknown method: {}", request.method);
                // Notifications (no id) shouldn't get error responses
                if request.id.is_none() {
                    None
                } else {
                    Some(JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!("Unknown method: {}", request.method),
                    ))
                }
            }
        }
    }

    /// Execute one of the gateway-backed tools
    async fn call_tool(&self, name: &str, arguments: &Value) -> ToolCallResult {
        match name {
            "generate_text" => {
                let prompt = arguments
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                match self.gateway.submit(prompt).await {
                    Ok(submitted) => ToolCallResult::text(
                        serde_json::json!({ "job_id": submitted.job_id }).to_string(),
                    ),
                    Err(e) => ToolCallResult::error(e.to_string()),
                }
            }

            "job_status" => {
                let job_id = arguments
                    .get("job_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if job_id.is_empty() {
                    return ToolCallResult::error("job_id must be provided".to_string());
                }
                match self.gateway.status(job_id).await {
                    Ok(status) => ToolCallResult::text(
                        serde_json::to_value(&status)
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                    ),
                    Err(e) => ToolCallResult::error(e.to_string()),
                }
            }

            other => ToolCallResult::error(format!("Unknown tool: {other}")),
        }
    }

    /// Serve a `job://<id>` resource read
    async fn read_resource(&self, id: Value, uri: &str) -> Option<JsonRpcResponse> {
        let Some(job_id) = uri.strip_prefix(JOB_URI_SCHEME).filter(|s| !s.is_empty()) else {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Unsupported resource uri: {uri}"),
            ));
        };

        match self.gateway.status(job_id).await {
            Ok(status) => {
                let contents = ResourceContents {
                    uri: uri.to_string(),
                    mime_type: "application/json".to_string(),
                    text: serde_json::to_value(&status)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                };
                Some(JsonRpcResponse::success(
                    id,
                    serde_json::json!({ "contents": [contents] }),
                ))
            }
            Err(GatewayError::Queue(e)) => Some(JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                e.to_string(),
            )),
            Err(e) => Some(JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string())),
        }
    }
}

/// The tools this server advertises
fn tool_definitions() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "generate_text".to_string(),
            description: "Queue a text prompt for asynchronous generation; returns a job_id to poll".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The input text prompt."
                    }
                },
                "required": ["prompt"]
            }),
        },
        McpTool {
            name: "job_status".to_string(),
            description: "Look up the state and result of a previously queued job".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "job_id": {
                        "type": "string",
                        "description": "Id returned by generate_text."
                    }
                },
                "required": ["job_id"]
            }),
        },
    ]
}

/// Write a JSON-RPC response to stdout (newline-delimited)
async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &JsonRpcResponse,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .context("Failed to serialize response")?;
    debug!("MCP sending: {}", log_preview(&json));
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
