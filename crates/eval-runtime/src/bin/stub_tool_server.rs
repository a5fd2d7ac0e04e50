//! Minimal MCP tool server for transport tests.
//!
//! Speaks newline-delimited JSON-RPC on stdio and serves a fixed catalog:
//!
//! - `users`: returns two users; the team name comes from `STUB_TEAM`
//! - `echo`: pings the client first, then returns its arguments as text
//! - `fail`: returns a tool-level error (`isError: true`)
//! - `crash`: exits without replying
//!
//! Setting `STUB_EXIT_ON_START=1` makes the server exit before the handshake.

use eval_runtime::mcp::RpcError;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

const SERVER_VERSION: &str = "0.4.2";

struct Server {
    input: Lines<BufReader<Stdin>>,
    output: Stdout,
}

impl Server {
    async fn write(&mut self, frame: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        self.output.write_all(line.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn reply(&mut self, id: &Value, result: Value) -> anyhow::Result<()> {
        self.write(&json!({"jsonrpc": "2.0", "id": id, "result": result})).await
    }

    async fn reply_error(&mut self, id: &Value, code: i64, message: &str) -> anyhow::Result<()> {
        self.write(&json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}))
            .await
    }

    async fn handle(&mut self, frame: Value) -> anyhow::Result<()> {
        let Some(id) = frame.get("id").cloned() else {
            // notifications/initialized and friends
            return Ok(());
        };
        let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "initialize" => {
                self.write(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": "starting"}
                }))
                .await?;
                self.reply(
                    &id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "stub-tool-server", "version": SERVER_VERSION}
                    }),
                )
                .await
            }
            "tools/list" => {
                let page = if params.get("cursor").and_then(Value::as_str) == Some("2") {
                    json!({"tools": [
                        {"name": "echo", "description": "Echo arguments", "inputSchema": {"type": "object"}},
                        {"name": "fail", "description": "Always fails", "inputSchema": {"type": "object"}},
                        {"name": "crash", "description": "Exits", "inputSchema": {"type": "object"}}
                    ]})
                } else {
                    json!({
                        "tools": [{"name": "users", "description": "List users", "inputSchema": {"type": "object"}}],
                        "nextCursor": "2"
                    })
                };
                self.reply(&id, page).await
            }
            "tools/call" => self.call_tool(&id, &params).await,
            other => self.reply_error(&id, RpcError::METHOD_NOT_FOUND, &format!("Method not found: {other}")).await,
        }
    }

    async fn call_tool(&mut self, id: &Value, params: &Value) -> anyhow::Result<()> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match name {
            "users" => {
                let team = std::env::var("STUB_TEAM").unwrap_or_else(|_| "unknown".into());
                let users = json!([{"name": "Ada", "team": team}, {"name": "Grace", "team": team}]);
                self.reply(id, json!({"content": [{"type": "text", "text": users.to_string()}]}))
                    .await
            }
            "echo" => {
                self.write(&json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"})).await?;
                let pong = self.next_frame().await?;
                anyhow::ensure!(pong.get("id") == Some(&json!("srv-1")), "expected ping response, got {pong}");
                self.reply(id, json!({"content": [{"type": "text", "text": arguments.to_string()}]}))
                    .await
            }
            "fail" => {
                self.reply(
                    id,
                    json!({"content": [{"type": "text", "text": "fail always fails"}], "isError": true}),
                )
                .await
            }
            "crash" => std::process::exit(3),
            other => self.reply_error(id, RpcError::INVALID_PARAMS, &format!("Unknown tool: {other}")).await,
        }
    }

    async fn next_frame(&mut self) -> anyhow::Result<Value> {
        let line = self
            .input
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("client closed stdin"))?;
        Ok(serde_json::from_str(&line)?)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if std::env::var("STUB_EXIT_ON_START").is_ok_and(|v| v == "1") {
        std::process::exit(2);
    }

    let mut server = Server {
        input: BufReader::new(tokio::io::stdin()).lines(),
        output: tokio::io::stdout(),
    };

    while let Some(line) = server.input.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = serde_json::from_str(&line)?;
        server.handle(frame).await?;
    }
    Ok(())
}
