//! MCP server: JSON-RPC 2.0, one message per line over stdin/stdout.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::SplitStream;

use crate::{
    dispatcher::{self, ToolDispatcher},
    error::Result,
};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Deserialize)]
struct McpRequest {
    #[serde(default)]
    jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct McpResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<McpError>,
}

#[derive(Debug, Serialize)]
pub struct McpError {
    code: i32,
    message: String,
}

impl McpResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
            }),
        }
    }
}

pub struct McpServer {
    name: String,
    dispatcher: ToolDispatcher,
}

impl McpServer {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            dispatcher,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Serves until stdin closes.
    pub async fn serve(&self) -> Result<()> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Requests are handled one at a time, in arrival order.
    pub async fn serve_io<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'));
        log::info!("📡 Listening for MCP requests on stdin");

        while let Some(line) = lines.next().await {
            let response = match String::from_utf8(line?) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(&line).await,
                Err(e) => {
                    log::warn!("Message is not valid UTF-8: {}", e);
                    Some(McpResponse::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };
            if let Some(response) = response {
                let mut payload = serde_json::to_vec(&response)?;
                payload.push(b'\n');
                writer.write_all(&payload).await?;
                writer.flush().await?;
            }
        }

        log::info!("stdin closed, shutting down");
        Ok(())
    }

    /// `None` for notifications, which get no reply.
    pub async fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Unparseable message: {}", e);
                return Some(McpResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let request: McpRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                return Some(McpResponse::error(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ));
            }
        };
        if request.jsonrpc != "2.0" {
            log::debug!("Request without jsonrpc 2.0 marker: {:?}", request.jsonrpc);
        }

        let Some(id) = request.id else {
            log::debug!("Notification: {}", request.method);
            return None;
        };

        log::debug!("→ {} (id {})", request.method, id);
        let response = match request.method.as_str() {
            "initialize" => McpResponse::result(id, self.initialize_result()),
            "ping" => McpResponse::result(id, json!({})),
            "tools/list" => McpResponse::result(id, json!({ "tools": dispatcher::tools() })),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            method => McpResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": self.name,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": false }
            }
        })
    }

    async fn handle_tools_call(&self, id: Value, params: Value) -> McpResponse {
        let params: ToolCallParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return McpResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
        };

        if dispatcher::capability_for_tool(&params.name).is_err() {
            return McpResponse::error(
                id,
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        }

        match self.dispatcher.invoke(&params.name, &params.arguments).await {
            Ok(envelope) => {
                let structured = serde_json::to_value(&envelope).unwrap_or(Value::Null);
                McpResponse::result(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": envelope.message }],
                        "structuredContent": structured
                    }),
                )
            }
            Err(e) => {
                log::error!("{} failed: {}", params.name, e);
                McpResponse::result(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": format!("Error: {}", e) }],
                        "isError": true
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderId, ProviderRegistry};
    use crate::selector::ProviderSelector;

    fn server() -> McpServer {
        let dispatcher = ToolDispatcher::new(
            ProviderRegistry::new(),
            ProviderSelector::new(ProviderId::Gemini, None, Vec::new()),
            std::env::temp_dir(),
        );
        McpServer::new(dispatcher).with_name("rgen-media-test")
    }

    async fn call(server: &McpServer, line: &str) -> Value {
        let response = server.handle_line(line).await.unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "rgen-media-test");
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#,
        )
        .await;
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "generate_image",
                "edit_image",
                "remove_background",
                "generate_mesh",
                "generate_sound"
            ]
        );
    }

    #[tokio::test]
    async fn test_notification_gets_no_reply() {
        let server = server();
        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();
        let response = call(&server, "{not json").await;
        assert_eq!(response["error"]["code"], PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);

        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);

        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"upscale"}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], INVALID_PARAMS);

        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_in_result() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "generate_image", "arguments": {}}
        });
        let response = call(&server(), &request.to_string()).await;
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("prompt"), "{}", text);
    }

    #[tokio::test]
    async fn test_serve_io_writes_one_line_per_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n"
        );
        let mut output = Vec::new();
        server().serve_io(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_server() {
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.extend_from_slice(b"\n\xff\xfe garbage\r\n");
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#);
        input.push(b'\n');

        let mut output = Vec::new();
        server().serve_io(input.as_slice(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["error"]["code"], PARSE_ERROR);
        assert_eq!(lines[1]["id"], Value::Null);
        assert_eq!(lines[2]["id"], 2);
        assert_eq!(lines[2]["result"], json!({}));
    }
}
