//! JSON-RPC bridge to a tool server over its stdio.
//!
//! One writer task owns the server's stdin and one reader task owns its
//! stdout, both framed one JSON document per line. Responses are routed to
//! their waiting request by id, so they may arrive in any order; responses
//! nobody waits for any more are logged and dropped. Notifications queue up
//! until drained, keeping only the newest ones. Server-initiated `ping` is answered; other server
//! requests get "method not found".

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::process::ServerProcess;
use crate::protocol::{
    Incoming, METHOD_NOT_FOUND, Notification, Request, Response, ServerInfo, ToolCall, ToolCalls,
    ToolInfo, ToolsPage, tool_result,
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use trellis_core::BridgeId;

/// Longest line accepted from a server
const MAX_LINE: usize = 16 * 1024 * 1024;

/// Undrained notifications kept per bridge; older ones are dropped
const MAX_NOTIFICATIONS: usize = 1024;

/// Most `tools/list` pages followed in one listing
const MAX_TOOL_PAGES: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;
type Notifications = Arc<Mutex<VecDeque<Notification>>>;

/// Framed duplex channel to the server
struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    notifications: Notifications,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Channel {
    fn open(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
        let pending: Pending = Arc::default();
        let notifications: Notifications = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));

        let writer_alive = alive.clone();
        let writer = tokio::spawn(async move {
            let mut sink = FramedWrite::new(stdin, LinesCodec::new());
            while let Some(line) = queue.recv().await {
                tracing::debug!(direction = "out", "{}", line);
                if let Err(e) = sink.send(line).await {
                    tracing::warn!(error = %e, "write to server failed");
                    writer_alive.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(
            FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE)),
            pending.clone(),
            notifications.clone(),
            outbound.clone(),
            alive.clone(),
        ));

        Self {
            outbound,
            pending,
            notifications,
            next_id: AtomicU64::new(1),
            alive,
            tasks: vec![writer, reader],
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn send<T: serde::Serialize>(&self, message: &T) -> BridgeResult<()> {
        if !self.is_alive() {
            return Err(BridgeError::Closed);
        }
        let line = serde_json::to_string(message)?;
        self.outbound.send(line).map_err(|_| BridgeError::Closed)
    }

    async fn ask(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel_on_timeout: bool,
    ) -> BridgeResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        if let Err(e) = self.send(&request) {
            self.lock_pending().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(|error| BridgeError::Rpc {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.lock_pending().remove(&id);
                tracing::warn!(id, method, ?timeout, "request timed out");
                if cancel_on_timeout {
                    let notice = Notification::new(
                        "notifications/cancelled",
                        Some(json!({"requestId": id, "reason": "timeout"})),
                    );
                    if let Err(e) = self.send(&notice) {
                        tracing::debug!(id, error = %e, "could not send cancellation");
                    }
                }
                Err(BridgeError::Timeout {
                    request,
                    after: timeout,
                })
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Response>>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn drain(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
        self.lock_pending().clear();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(
    mut lines: FramedRead<ChildStdout, LinesCodec>,
    pending: Pending,
    notifications: Notifications,
    outbound: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
) {
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable line from server");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!(direction = "in", "{}", line);

        match Incoming::parse(&line) {
            Ok(Incoming::Response(response)) => {
                let waiter = response.id.as_u64().and_then(|id| {
                    pending
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(&id)
                });
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::warn!(id = %response.id, "dropping orphaned response"),
                }
            }
            Ok(Incoming::Notification(notification)) => {
                let mut queue = notifications
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                enqueue(&mut queue, notification, MAX_NOTIFICATIONS);
            }
            Ok(Incoming::Request { id, method, .. }) => {
                let reply = if method == "ping" {
                    Response::success(id, json!({}))
                } else {
                    tracing::debug!(method = %method, "rejecting server request");
                    Response::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
                };
                match serde_json::to_string(&reply) {
                    Ok(line) => {
                        let _ = outbound.send(line);
                    }
                    Err(e) => tracing::warn!(error = %e, "could not encode reply"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "ignoring malformed message"),
        }
    }

    tracing::debug!("server closed its output");
    alive.store(false, Ordering::SeqCst);
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clear();
}

/// Queue a notification, dropping the oldest once `capacity` is reached
fn enqueue(queue: &mut VecDeque<Notification>, notification: Notification, capacity: usize) {
    while queue.len() >= capacity.max(1) {
        if let Some(dropped) = queue.pop_front() {
            tracing::warn!(method = %dropped.method, capacity, "notification queue full, dropping oldest");
        }
    }
    queue.push_back(notification);
}

/// A live connection to one tool server
///
/// Created by [`Bridge::start`], which runs the handshake. Share it behind
/// an `Arc`; every method takes `&self`.
pub struct Bridge {
    id: BridgeId,
    config: BridgeConfig,
    channel: Channel,
    process: tokio::sync::Mutex<ServerProcess>,
    server_info: ServerInfo,
    tools: RwLock<Vec<ToolInfo>>,
    shut: AtomicBool,
}

impl Bridge {
    /// Spawn the server and run the handshake
    ///
    /// `initialize` (request id 1), `notifications/initialized`, a pause of
    /// `settle`, then `tools/list` (request id 2). The first request made
    /// through the returned bridge therefore has id 3.
    ///
    /// # Errors
    ///
    /// Returns error if the server cannot be spawned or any handshake step
    /// fails. The process is stopped before a handshake error is returned.
    pub async fn start(config: BridgeConfig) -> BridgeResult<Self> {
        let (mut process, stdin, stdout) = ServerProcess::spawn(&config)?;
        let channel = Channel::open(stdin, stdout);

        match handshake(&channel, &config).await {
            Ok((server_info, tools)) => {
                let id = BridgeId::new();
                tracing::info!(
                    bridge = %id,
                    server = %server_info.implementation.name,
                    tools = tools.len(),
                    "bridge ready"
                );
                Ok(Self {
                    id,
                    config,
                    channel,
                    process: tokio::sync::Mutex::new(process),
                    server_info,
                    tools: RwLock::new(tools),
                    shut: AtomicBool::new(false),
                })
            }
            Err(error) => {
                tracing::warn!(command = %config.command_line(), error = %error, "handshake failed");
                channel.close();
                if let Err(e) = process.stop().await {
                    tracing::warn!(error = %e, "could not stop server after failed handshake");
                }
                Err(error)
            }
        }
    }

    /// Bridge identifier
    #[must_use]
    pub fn id(&self) -> BridgeId {
        self.id
    }

    /// Configuration it was started with
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// What the server reported during `initialize`
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Cached tool catalogue
    #[must_use]
    pub fn tools(&self) -> Vec<ToolInfo> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Find a tool in the cached catalogue
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<ToolInfo> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// OS process id of the server
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.pid()
    }

    /// Check if the bridge can still carry requests
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shut.load(Ordering::SeqCst) && self.channel.is_alive()
    }

    /// Send a request and wait for its response
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Timeout`] carrying the request if no response
    /// arrives in time, [`BridgeError::Rpc`] for error responses and
    /// [`BridgeError::Closed`] if the bridge is shut down.
    pub async fn ask(&self, method: &str, params: Option<Value>, timeout: Duration) -> BridgeResult<Value> {
        if self.shut.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        self.channel
            .ask(method, params, timeout, self.config.cancel_on_timeout)
            .await
    }

    /// Send a notification
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is closed
    pub fn tell(&self, method: &str, params: Option<Value>) -> BridgeResult<()> {
        if self.shut.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        self.channel.send(&Notification::new(method, params))
    }

    /// Take every notification received so far
    #[must_use]
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.channel.drain()
    }

    /// Call a tool
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ToolCallFailed`] for error responses and
    /// `isError` results, or the transport error.
    pub async fn call(&self, tool: &str, arguments: Value, timeout: Duration) -> BridgeResult<Value> {
        let params = json!({"name": tool, "arguments": arguments});
        match self.ask("tools/call", Some(params), timeout).await {
            Ok(result) => tool_result(tool, &arguments, result),
            Err(BridgeError::Rpc { error, .. }) => Err(BridgeError::ToolCallFailed {
                tool: tool.to_string(),
                arguments,
                error: error.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Call one tool, or several in order
    ///
    /// A single call returns its result; a batch returns the list of
    /// results. The first failing call fails the batch.
    ///
    /// # Errors
    ///
    /// Returns the first call's error
    pub async fn call_batch(&self, calls: &ToolCalls, timeout: Duration) -> BridgeResult<Value> {
        match calls {
            ToolCalls::One(call) => self.call_one(call, timeout).await,
            ToolCalls::Many(calls) => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(self.call_one(call, timeout).await?);
                }
                Ok(Value::Array(results))
            }
        }
    }

    async fn call_one(&self, call: &ToolCall, timeout: Duration) -> BridgeResult<Value> {
        self.call(&call.name, call.arguments.clone(), timeout).await
    }

    /// Re-fetch the tool catalogue
    ///
    /// # Errors
    ///
    /// Returns error if `tools/list` fails
    pub async fn refresh_tools(&self) -> BridgeResult<Vec<ToolInfo>> {
        let tools = list_tools(&self.channel, &self.config).await?;
        *self
            .tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = tools.clone();
        Ok(tools)
    }

    /// Close the channel and stop the server; later calls do nothing
    ///
    /// # Errors
    ///
    /// Returns error if the process could not be stopped
    pub async fn shutdown(&self) -> BridgeResult<()> {
        if self.shut.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.channel.close();
        self.process.lock().await.stop().await?;
        tracing::info!(bridge = %self.id, "bridge shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("command", &self.config.command_line())
            .field("server", &self.server_info.implementation)
            .field("open", &self.is_open())
            .finish()
    }
}

async fn handshake(channel: &Channel, config: &BridgeConfig) -> BridgeResult<(ServerInfo, Vec<ToolInfo>)> {
    let failed = |stage: &str, error: BridgeError| BridgeError::Handshake {
        stage: stage.to_string(),
        reason: error.to_string(),
    };

    let params = json!({
        "protocolVersion": config.protocol_version,
        "capabilities": {},
        "clientInfo": {"name": config.client_name, "version": config.client_version}
    });
    let result = channel
        .ask("initialize", Some(params), config.timeout(), false)
        .await
        .map_err(|e| failed("initialize", e))?;
    let server_info: ServerInfo =
        serde_json::from_value(result).map_err(|e| failed("initialize", e.into()))?;

    channel
        .send(&Notification::new("notifications/initialized", None))
        .map_err(|e| failed("initialized", e))?;
    tokio::time::sleep(config.settle()).await;

    let tools = list_tools(channel, config)
        .await
        .map_err(|e| failed("tools/list", e))?;
    Ok((server_info, tools))
}

async fn list_tools(channel: &Channel, config: &BridgeConfig) -> BridgeResult<Vec<ToolInfo>> {
    let mut tools = Vec::new();
    let mut cursors = Cursors::default();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.as_ref().map(|c| json!({"cursor": c}));
        let result = channel
            .ask("tools/list", params, config.timeout(), config.cancel_on_timeout)
            .await?;
        let page: ToolsPage = serde_json::from_value(result)?;
        tools.extend(page.tools);
        match cursors.follow(page.next_cursor)? {
            Some(next) => cursor = Some(next),
            None => return Ok(tools),
        }
    }
}

/// Cursors already followed in one `tools/list` listing
#[derive(Debug, Default)]
struct Cursors {
    seen: HashSet<String>,
}

impl Cursors {
    /// Cursor of the next page, or `None` when the listing is complete
    ///
    /// A repeated cursor or a listing longer than [`MAX_TOOL_PAGES`] is a
    /// protocol error.
    fn follow(&mut self, next: Option<String>) -> BridgeResult<Option<String>> {
        let Some(next) = next.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        if self.seen.len() + 1 >= MAX_TOOL_PAGES {
            return Err(BridgeError::Protocol {
                reason: format!("tools/list has more than {} pages", MAX_TOOL_PAGES),
            });
        }
        if !self.seen.insert(next.clone()) {
            return Err(BridgeError::Protocol {
                reason: format!("tools/list repeated cursor {:?}", next),
            });
        }
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u64) -> Notification {
        Notification::new("notifications/message", Some(json!({"n": n})))
    }

    #[test]
    fn test_enqueue_drops_oldest_when_full() {
        let mut queue = VecDeque::new();
        for n in 0..5 {
            enqueue(&mut queue, note(n), 3);
        }
        assert_eq!(queue.len(), 3);
        let kept: Vec<Value> = queue.iter().filter_map(|n| n.params.clone()).collect();
        assert_eq!(kept, vec![json!({"n": 2}), json!({"n": 3}), json!({"n": 4})]);
    }

    #[test]
    fn test_enqueue_keeps_everything_below_capacity() {
        let mut queue = VecDeque::new();
        for n in 0..MAX_NOTIFICATIONS as u64 {
            enqueue(&mut queue, note(n), MAX_NOTIFICATIONS);
        }
        assert_eq!(queue.len(), MAX_NOTIFICATIONS);
        assert_eq!(queue.front().and_then(|n| n.params.clone()), Some(json!({"n": 0})));
    }

    #[test]
    fn test_cursors_follow_until_listing_ends() {
        let mut cursors = Cursors::default();
        assert_eq!(cursors.follow(Some("a".to_string())).unwrap(), Some("a".to_string()));
        assert_eq!(cursors.follow(Some("b".to_string())).unwrap(), Some("b".to_string()));
        assert_eq!(cursors.follow(Some(String::new())).unwrap(), None);
        assert_eq!(cursors.follow(None).unwrap(), None);
    }

    #[test]
    fn test_cursors_reject_repeat() {
        let mut cursors = Cursors::default();
        cursors.follow(Some("a".to_string())).unwrap();
        cursors.follow(Some("b".to_string())).unwrap();
        let err = cursors.follow(Some("a".to_string())).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol { ref reason } if reason.contains("repeated")), "{:?}", err);
    }

    #[test]
    fn test_cursors_cap_pages() {
        let mut cursors = Cursors::default();
        for page in 1..MAX_TOOL_PAGES {
            cursors.follow(Some(format!("page-{}", page))).unwrap();
        }
        let err = cursors.follow(Some("one-more".to_string())).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol { .. }), "{:?}", err);
    }
}
