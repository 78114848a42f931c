//! Tool server for exercising the bridge.
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout and serves a few tools:
//! `echo`, `add`, `sleep`, `fail` and, with `--roundtrip`, a tool that
//! sends requests back to the client. Tool calls run concurrently so
//! responses can come back out of order.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

#[derive(Parser, Debug)]
#[command(name = "trellis-mock-server", about = "Tool server for bridge tests")]
struct Args {
    /// Answer `initialize` with an error
    #[arg(long)]
    fail_init: bool,

    /// Serve the `roundtrip` tool
    #[arg(long)]
    roundtrip: bool,

    /// Answer every `tools/list` with the same next-page cursor
    #[arg(long)]
    loop_cursor: bool,

    /// Write the process id to this file at startup
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

type Replies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

#[derive(Clone)]
struct Server {
    out: mpsc::UnboundedSender<Value>,
    replies: Replies,
    roundtrip: bool,
    fail_init: bool,
    loop_cursor: bool,
}

impl Server {
    fn respond(&self, id: Value, result: Value) {
        let _ = self.out.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    fn fail(&self, id: Value, code: i64, message: &str) {
        let _ = self.out.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }));
    }

    fn notify(&self, method: &str, params: Value) {
        let _ = self.out.send(json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    async fn ask_client(&self, id: &str, method: &str) -> Value {
        let (tx, rx) = oneshot::channel();
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.to_string(), tx);
        let _ = self.out.send(json!({"jsonrpc": "2.0", "id": id, "method": method}));
        rx.await.unwrap_or(Value::Null)
    }

    fn tools(&self) -> Value {
        let mut tools = vec![
            json!({
                "name": "echo",
                "description": "Echo a message back.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }
            }),
            json!({
                "name": "add",
                "description": "Add two integers.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"]
                },
                "outputSchema": {
                    "type": "object",
                    "properties": {"result": {"type": "integer"}},
                    "required": ["result"]
                }
            }),
            json!({
                "name": "sleep",
                "description": "Wait, then answer.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"ms": {"type": "integer", "minimum": 0}},
                    "required": ["ms"]
                }
            }),
            json!({
                "name": "fail",
                "description": "Always reports an error.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}}
                }
            }),
        ];
        if self.roundtrip {
            tools.push(json!({
                "name": "roundtrip",
                "description": "Sends requests to the client and reports the replies.",
                "inputSchema": {"type": "object"}
            }));
        }
        json!({ "tools": tools })
    }

    fn handle(&self, message: Value) {
        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let method = message.get("method").and_then(Value::as_str).map(str::to_string);
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match (method, id) {
            (None, Some(id)) => {
                let key = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
                let waiter = self
                    .replies
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&key);
                if let Some(tx) = waiter {
                    let _ = tx.send(message);
                }
            }
            (Some(method), None) => {
                eprintln!("notification {}", method);
            }
            (Some(method), Some(id)) => match method.as_str() {
                "initialize" if self.fail_init => self.fail(id, -32603, "initialization refused"),
                "initialize" => {
                    let version = params
                        .get("protocolVersion")
                        .cloned()
                        .unwrap_or_else(|| json!("2024-11-05"));
                    self.respond(
                        id,
                        json!({
                            "protocolVersion": version,
                            "capabilities": {"tools": {}},
                            "serverInfo": {
                                "name": "trellis-mock-server",
                                "version": env!("CARGO_PKG_VERSION")
                            }
                        }),
                    );
                }
                "ping" => self.respond(id, json!({})),
                "tools/list" if self.loop_cursor => {
                    let mut page = self.tools();
                    page["nextCursor"] = json!("again");
                    self.respond(id, page);
                }
                "tools/list" => self.respond(id, self.tools()),
                "tools/call" => {
                    let server = self.clone();
                    tokio::spawn(async move { server.call(id, params).await });
                }
                _ => self.fail(id, -32601, &format!("Method not found: {}", method)),
            },
            (None, None) => eprintln!("ignoring {}", message),
        }
    }

    async fn call(&self, id: Value, params: Value) {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        self.notify(
            "notifications/message",
            json!({"level": "info", "data": format!("calling {}", name)}),
        );

        let text = |body: String| json!({"content": [{"type": "text", "text": body}]});
        match name {
            "echo" => {
                let message = args.get("message").and_then(Value::as_str).unwrap_or_default();
                self.respond(id, text(message.to_string()));
            }
            "add" => {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                let mut result = text((a + b).to_string());
                result["structuredContent"] = json!({"result": a + b});
                self.respond(id, result);
            }
            "sleep" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.respond(id, text(format!("slept {}", ms)));
            }
            "fail" => {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("tool failed");
                let mut result = text(message.to_string());
                result["isError"] = json!(true);
                self.respond(id, result);
            }
            "roundtrip" if self.roundtrip => {
                let ping = self.ask_client("srv-1", "ping").await;
                let other = self.ask_client("srv-2", "sampling/createMessage").await;
                self.respond(
                    id,
                    json!({"structuredContent": {"ping": ping, "other": other}, "content": []}),
                );
            }
            _ => self.fail(id, -32602, &format!("Unknown tool: {}", name)),
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }

    let (out, mut queue) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
        while let Some(message) = queue.recv().await {
            if sink.send(message.to_string()).await.is_err() {
                break;
            }
        }
    });

    let server = Server {
        out,
        replies: Arc::default(),
        roundtrip: args.roundtrip,
        fail_init: args.fail_init,
        loop_cursor: args.loop_cursor,
    };

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(Ok(line)) = lines.next().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(message) => server.handle(message),
            Err(e) => eprintln!("bad line: {}", e),
        }
    }

    drop(server);
    let _ = writer.await;
    Ok(())
}
