//! Stdio transport to an MCP tool server.
//!
//! The server is a child process speaking newline-delimited JSON-RPC on its
//! stdin/stdout. Its stderr is inherited so server logs stay visible.
//!
//! # Lifecycle
//!
//! 1. [`StdioTransport::connect`] spawns the process, performs the
//!    `initialize` handshake and reads the full tool catalog.
//! 2. [`ToolChannel::invoke`] sends one `tools/call` and waits for its reply.
//!    Server-initiated `ping` requests are answered while waiting and
//!    notifications are skipped.
//!    A lost or desynchronized channel kills the server; every later call
//!    fails with [`EvalError::Connection`].
//! 3. [`ToolChannel::close`] closes stdin, waits briefly for the process to
//!    exit and kills it otherwise. Later calls are no-ops.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eval_core::{EvalError, Result, ToolChannel, ToolDescriptor, ToolOutput};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, MessageKind, RpcError, classify_message,
};

/// How long `close` waits for the server to exit after stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tool server launch settings
#[derive(Clone, Debug, Default)]
pub struct StdioServerConfig {
    /// Executable to run
    pub command: String,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Variables added to the inherited environment
    pub env: HashMap<String, String>,
}

impl StdioServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Live pipes to the child process
struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Connection {
    fn spawn(config: &StdioServerConfig) -> Result<Self> {
        debug!(command = %config.command, args = ?config.args, "Spawning tool server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvalError::Connection(format!("Failed to start {}: {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::Connection("Failed to capture tool server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvalError::Connection("Failed to capture tool server stdout".into()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
        })
    }

    async fn send<T: Serialize + Sync>(&mut self, frame: &T) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| channel_error("write to tool server", &e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| channel_error("flush tool server stdin", &e))
    }

    async fn read_frame(&mut self) -> Result<Value> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| channel_error("read from tool server", &e))?
                .ok_or_else(|| EvalError::Connection("Tool server closed its output".into()))?;

            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map_err(|e| EvalError::Connection(format!("Malformed frame from tool server: {e}")));
        }
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        self.send(&JsonRpcNotification::new(method)).await
    }

    /// Send a request and wait for its response.
    ///
    /// A JSON-RPC error reply is a [`EvalError::ToolInvocation`]; anything
    /// that leaves the pipes unusable is a [`EvalError::Connection`].
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(id, method, "Sending request");
        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let frame = self.read_frame().await?;
            match classify_message(&frame) {
                MessageKind::Response => {
                    let response: JsonRpcResponse = serde_json::from_value(frame)
                        .map_err(|e| EvalError::Connection(format!("Malformed response to {method}: {e}")))?;
                    if response.id.as_u64() != Some(id) {
                        return Err(EvalError::Connection(format!(
                            "Response id {} does not match request id {id}",
                            response.id
                        )));
                    }
                    return response
                        .into_result()
                        .map_err(|e| EvalError::ToolInvocation(format!("{method} failed: {e}")));
                }
                MessageKind::IncomingRequest { method: incoming } => {
                    self.answer(&frame, &incoming).await?;
                }
                MessageKind::Notification => {
                    let notification = frame.get("method").and_then(Value::as_str).unwrap_or("?");
                    debug!(method = notification, "Skipping notification");
                }
            }
        }
    }

    /// Reply to a server-initiated request
    async fn answer(&mut self, frame: &Value, method: &str) -> Result<()> {
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let response = if method == "ping" {
            JsonRpcResponse::success(id, serde_json::json!({}))
        } else {
            debug!(method, "Rejecting unsupported server request");
            JsonRpcResponse::failure(
                id,
                RpcError::new(RpcError::METHOD_NOT_FOUND, format!("Method not found: {method}")),
            )
        };
        self.send(&response).await
    }

    async fn handshake(&mut self) -> Result<Implementation> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if !init.protocol_version.is_empty() && init.protocol_version != super::protocol::PROTOCOL_VERSION {
            debug!(server = %init.protocol_version, "Server negotiated a different protocol version");
        }
        self.notify("notifications/initialized").await?;
        Ok(init.server_info)
    }

    /// Read every page of the tool catalog
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({"cursor": c}));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
    }

    /// Kill the child without waiting for a graceful exit
    async fn abort(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill tool server");
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        drop(self.stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Tool server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(EvalError::Io(e)),
            Err(_) => {
                warn!("Tool server did not exit after stdin closed, killing it");
                self.child.kill().await.map_err(EvalError::Io)
            }
        }
    }
}

fn channel_error(action: &str, err: &std::io::Error) -> EvalError {
    EvalError::Connection(format!("Failed to {action}: {err}"))
}

/// A connected MCP tool server
pub struct StdioTransport {
    server_info: Implementation,
    tools: Vec<ToolDescriptor>,
    connection: Mutex<Option<Connection>>,
}

impl StdioTransport {
    /// Spawn the server, run the handshake and read the tool catalog.
    ///
    /// Any failure here is a [`EvalError::Connection`]; the child is killed
    /// before the error is returned.
    pub async fn connect(config: &StdioServerConfig) -> Result<Self> {
        let mut connection = Connection::spawn(config)?;

        let discovered = async {
            let server_info = connection.handshake().await?;
            let tools = connection.list_tools().await?;
            Ok::<_, EvalError>((server_info, tools))
        }
        .await;

        match discovered {
            Ok((server_info, tools)) => {
                info!(
                    server = %server_info.name,
                    version = %server_info.version,
                    tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "Connected to tool server"
                );
                Ok(Self {
                    server_info,
                    tools,
                    connection: Mutex::new(Some(connection)),
                })
            }
            Err(err) => {
                if let Err(e) = connection.shutdown().await {
                    warn!(error = %e, "Failed to stop tool server after handshake failure");
                }
                Err(match err {
                    EvalError::Connection(msg) => EvalError::Connection(msg),
                    other => EvalError::Connection(format!("Handshake with {} failed: {other}", config.command)),
                })
            }
        }
    }

    /// Server name and version from the handshake
    pub const fn server_info(&self) -> &Implementation {
        &self.server_info
    }
}

#[async_trait]
impl ToolChannel for StdioTransport {
    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    fn server_version(&self) -> &str {
        &self.server_info.version
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| EvalError::Connection("Tool channel is closed".into()))?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = match connection.request("tools/call", Some(params)).await {
            Ok(result) => result,
            Err(err) => {
                // The pipes can't be trusted after a channel failure
                if err.is_connection() {
                    if let Some(dead) = guard.take() {
                        warn!(server = %self.server_info.name, error = %err, "Tool channel lost, stopping server");
                        dead.abort().await;
                    }
                }
                return Err(err);
            }
        };

        serde_json::from_value(result)
            .map_err(|e| EvalError::ToolInvocation(format!("Malformed tools/call result for {name}: {e}")))
    }

    async fn close(&self) -> Result<()> {
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => {
                info!(server = %self.server_info.name, "Closing tool server");
                connection.shutdown().await
            }
            None => Ok(()),
        }
    }
}
