//! Client for tool servers speaking the Model Context Protocol over stdio.
//!
//! Messages are newline-delimited JSON-RPC 2.0. A background task reads the
//! server's output and routes each response to the request waiting on its id.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

type ResponseWaiter = oneshot::Sender<AgentResult<Value>>;
type PendingRequests = Arc<Mutex<HashMap<u64, ResponseWaiter>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

const METHOD_NOT_FOUND: i64 = -32601;

/// How to launch a tool server as a child process
#[derive(Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Extra environment for the child only; never applied to this process
    pub env: HashMap<String, String>,
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // env carries secrets, only the keys are printed
        f.debug_struct("McpServerConfig")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// JSON-RPC connection to a single MCP server
pub struct McpClient {
    writer: SharedWriter,
    pending: PendingRequests,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl McpClient {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        tokio::spawn(Self::handle_messages(
            reader,
            writer.clone(),
            pending.clone(),
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn handle_messages<R: AsyncRead + Unpin>(
        reader: R,
        writer: SharedWriter,
        pending: PendingRequests,
    ) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read from MCP server: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!("Ignoring non JSON-RPC output from MCP server: {}", line);
                    continue;
                }
            };

            if let Some(method) = message.get("method").and_then(Value::as_str) {
                match message.get("id") {
                    Some(id) => {
                        let response = server_request_response(method, id.clone());
                        if let Err(e) = write_line(&writer, &response).await {
                            tracing::warn!("Failed to answer MCP server request {}: {}", method, e);
                        }
                    }
                    None => tracing::debug!("Received MCP notification: method={}", method),
                }
                continue;
            }

            let Some(id) = message.get("id").and_then(Value::as_u64) else {
                tracing::warn!("Received MCP response without a numeric id: {}", message);
                continue;
            };

            let result = match message.get("error") {
                Some(error) => Err(AgentError::ExecutionError(
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown MCP error")
                        .to_string(),
                )),
                None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };

            match pending.lock().await.remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(result);
                }
                None => tracing::warn!("Received response for unknown request ID: {}", id),
            }
        }

        // Fail everything still waiting, the server is gone
        for (_, waiter) in pending.lock().await.drain() {
            let _ = waiter.send(Err(AgentError::Transport(
                "MCP server closed the connection".to_string(),
            )));
        }
    }

    async fn write_message(&self, message: &Value) -> AgentResult<()> {
        write_line(&self.writer, message).await
    }

    /// Sends a request and waits for the response.
    pub async fn request(&self, method: &str, params: Value) -> AgentResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(e) = self.write_message(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AgentError::Transport(format!(
                "Request channel closed for method: {}",
                method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(AgentError::Transport(format!(
                    "Request timeout for method: {}",
                    method
                )))
            }
        }
    }

    pub async fn notify(&self, method: &str) -> AgentResult<()> {
        self.write_message(&json!({"jsonrpc": "2.0", "method": method}))
            .await
    }

    /// Runs the initialize handshake, returning the server's result
    pub async fn initialize(&self) -> AgentResult<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "sui-agent",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// Lists every tool, following pagination cursors
    pub async fn list_tools(&self) -> AgentResult<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| AgentError::Internal("tools/list result has no tools".into()))?;

            for tool in page {
                let name = tool
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AgentError::Internal("MCP tool without a name".into()))?;
                tools.push(Tool::new(
                    name,
                    tool.get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    tool.get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                ));
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> AgentResult<Vec<Content>> {
        tracing::debug!("Calling MCP tool: name={}", name);
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        let contents: Vec<Content> = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(convert_content).collect())
            .unwrap_or_default();

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            let message = contents
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AgentError::ExecutionError(message));
        }
        Ok(contents)
    }
}

async fn write_line(writer: &SharedWriter, message: &Value) -> AgentResult<()> {
    let mut line = message.to_string();
    line.push('\n');

    let mut writer = writer.lock().await;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))
}

/// Reply to a request initiated by the server. Only ping is supported.
fn server_request_response(method: &str, id: Value) -> Value {
    match method {
        "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
        _ => {
            tracing::debug!("Rejecting unsupported MCP server request: {}", method);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("Method not found: {}", method),
                }
            })
        }
    }
}

fn convert_content(item: &Value) -> Content {
    let content = match item.get("type").and_then(Value::as_str) {
        Some("text") => Content::text(item["text"].as_str().unwrap_or_default()),
        Some("image") => Content::image(
            item["data"].as_str().unwrap_or_default(),
            item["mimeType"].as_str().unwrap_or_default(),
        ),
        // Embedded resources and anything newer are passed on as their JSON
        _ => Content::text(item.to_string()),
    };

    let audience: Option<Vec<Role>> = item
        .get("annotations")
        .and_then(|annotations| annotations.get("audience"))
        .and_then(|audience| serde_json::from_value(audience.clone()).ok());
    match audience {
        Some(audience) => content.with_audience(audience),
        None => content,
    }
}

/// Tools served by an MCP server
pub struct McpSystem {
    name: String,
    description: String,
    instructions: String,
    tools: Vec<Tool>,
    client: McpClient,
    // Held so the server lives as long as the system, killed on drop
    _child: Option<Child>,
}

impl McpSystem {
    /// Launch the server process and load its tools
    pub async fn spawn(config: McpServerConfig) -> AgentResult<Self> {
        tracing::info!(
            "Starting MCP server '{}': {}",
            config.name,
            config.command.display()
        );
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::Transport(format!(
                    "Failed to start MCP server {}: {}",
                    config.command.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Internal("MCP server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Internal("MCP server stdout unavailable".into()))?;

        let mut system = Self::connect(&config.name, McpClient::new(stdout, stdin)).await?;
        system._child = Some(child);
        Ok(system)
    }

    /// Handshake over an existing connection and load the tool list
    pub async fn connect(name: &str, client: McpClient) -> AgentResult<Self> {
        let init = client.initialize().await?;
        let tools = client.list_tools().await?;

        let server_name = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or(name);
        let instructions = init
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        tracing::info!(
            "[MCP] loaded {} tools from '{}': {:?}",
            tools.len(),
            name,
            tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            name: name.to_string(),
            description: format!("Tools provided by the {} MCP server", server_name),
            instructions,
            tools,
            client,
            _child: None,
        })
    }
}

#[async_trait]
impl System for McpSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        if !self.tools.iter().any(|tool| tool.name == tool_call.name) {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }
        self.client
            .call_tool(&tool_call.name, tool_call.arguments)
            .await
    }
}
