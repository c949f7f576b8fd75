//! MCP Client Layer
//!
//! One [`McpConnection`] per external server. The connection owns a single
//! dedicated reader task that consumes the server's stdout; any number of
//! concurrent callers multiplex over the same process by request id.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!        \              |           |
//!         `-------------+-----------+--> Failed
//! ```
//!
//! 1. `initialize` (bounded by the init timeout)
//! 2. `notifications/initialized`
//! 3. `tools/list`, following `nextCursor` pages
//!
//! Any failure moves the connection to `Failed`. Outstanding calls are failed
//! with [`ClientError::ConnectionClosed`] and the [`ConnectionObserver`] is
//! told so it can drop the server's tools. Reconnecting is the caller's job.
//!
//! # Usage
//!
//! ```ignore
//! let transport = StdioTransport::spawn("k8s", "mcp-server-kubernetes", &[], &HashMap::new())?;
//! let conn = McpConnection::connect("k8s", transport, ConnectionSettings::default(), None).await?;
//! let result = conn.call_tool("pods_list", json!({"namespace": "default"})).await?;
//! ```

use crate::mcp::protocol::{
    CallToolResult, IncomingMessage, InitializeParams, InitializeResult, McpMethod,
    McpNotification, McpRequest, McpResponse, ServerInfo, Tool, ToolCallParams, ToolsListResult,
};
use crate::mcp::transport::{LineReader, LineWriter, ServerProcess, StdioTransport, TransportError};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on `tools/list` pages followed during the handshake
const MAX_TOOL_PAGES: usize = 64;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, handshake not started
    Uninitialized,

    /// Handshake in progress
    Initializing,

    /// Tools discovered, calls accepted
    Ready,

    /// Terminal; the process is gone or misbehaved
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("failed to spawn MCP server: {0}")]
    Spawn(String),

    #[error("I/O error talking to MCP server: {0}")]
    Io(String),

    #[error("protocol error in {method}: {reason}")]
    Protocol { method: String, reason: String },

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("connection to MCP server '{0}' closed")]
    ConnectionClosed(String),

    #[error("MCP server '{server}' is not ready ({state})")]
    NotReady {
        server: String,
        state: ConnectionState,
    },
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Spawn { .. } => ClientError::Spawn(e.to_string()),
            other => ClientError::Io(other.to_string()),
        }
    }
}

/// Timeouts applied by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Bound on each handshake step
    pub init_timeout: Duration,

    /// Bound on each `tools/call`
    pub call_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Receives lifecycle events from connections.
///
/// Implemented by the tool registry. Calls are synchronous and happen on the
/// task that observed the transition.
pub trait ConnectionObserver: Send + Sync {
    /// Handshake finished; `connection.tools()` is populated.
    fn on_ready(&self, connection: &Arc<McpConnection>);

    /// Connection entered `Failed`.
    fn on_failed(&self, server: &str, reason: &str);
}

/// Point-in-time view of one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

type PendingMap = HashMap<u64, oneshot::Sender<McpResponse>>;

struct Status {
    state: ConnectionState,
    last_error: Option<String>,
    tools: Vec<Tool>,
    server_info: Option<ServerInfo>,
}

/// State shared between callers and the reader task
struct Shared {
    name: String,
    status: Mutex<Status>,
    pending: Mutex<PendingMap>,
    process: Mutex<Option<ServerProcess>>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Move to `Failed` once. Later calls are no-ops.
    fn fail(&self, reason: &str) {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if status.state == ConnectionState::Failed {
                return;
            }
            status.state = ConnectionState::Failed;
            status.last_error = Some(reason.to_string());
            status.tools.clear();
        }
        error!(server = %self.name, reason, "MCP connection failed");

        if let Some(mut process) = self
            .process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            process.start_kill();
        }

        let drained: PendingMap =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));

        if let Some(observer) = &self.observer {
            observer.on_failed(&self.name, reason);
        }

        // Dropping the senders wakes every waiter with ConnectionClosed
        if !drained.is_empty() {
            warn!(server = %self.name, count = drained.len(), "failing in-flight MCP calls");
        }
        drop(drained);
    }

    fn dispatch(&self, line: &str) {
        match IncomingMessage::parse(line) {
            Ok(IncomingMessage::Response(response)) => {
                let Some(id) = response.id else {
                    warn!(server = %self.name, error = ?response.error, "MCP error without request id");
                    return;
                };
                let sender = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(server = %self.name, id, "discarding unmatched MCP response"),
                }
            }
            Ok(IncomingMessage::ServerMessage { method, id }) => {
                debug!(server = %self.name, method = %method, id = ?id, "ignoring server-initiated message");
            }
            Err(e) => {
                warn!(server = %self.name, error = %e, "unparseable line from MCP server");
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: LineReader) {
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => shared.dispatch(&line),
            Ok(None) => {
                shared.fail("server closed stdout");
                break;
            }
            Err(e) => {
                shared.fail(&format!("read error: {e}"));
                break;
            }
        }
    }
}

/// A live connection to one MCP server
pub struct McpConnection {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<LineWriter>,
    next_id: AtomicU64,
    settings: ConnectionSettings,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl McpConnection {
    /// Start the reader task and run the handshake.
    ///
    /// On success the observer's `on_ready` has already run. On failure the
    /// connection is `Failed`, its process is killed and `on_failed` has run.
    ///
    /// # Errors
    ///
    /// Returns the first error hit during the handshake.
    pub async fn connect(
        name: impl Into<String>,
        transport: StdioTransport,
        settings: ConnectionSettings,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Result<Arc<Self>, ClientError> {
        let (reader, writer, process) = transport.into_parts();
        let shared = Arc::new(Shared {
            name: name.into(),
            status: Mutex::new(Status {
                state: ConnectionState::Uninitialized,
                last_error: None,
                tools: Vec::new(),
                server_info: None,
            }),
            pending: Mutex::new(HashMap::new()),
            process: Mutex::new(process),
            observer,
        });

        let task = tokio::spawn(read_loop(Arc::clone(&shared), reader));
        let connection = Arc::new(Self {
            shared,
            writer: tokio::sync::Mutex::new(writer),
            next_id: AtomicU64::new(1),
            settings,
            reader_task: Mutex::new(Some(task)),
        });

        match connection.handshake().await {
            Ok(()) => {
                if let Some(observer) = &connection.shared.observer {
                    observer.on_ready(&connection);
                }
                Ok(connection)
            }
            Err(e) => {
                connection.shared.fail(&e.to_string());
                connection.abort_reader();
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Initializing);
        info!(server = %self.name(), "initializing MCP connection");

        let params = serde_json::to_value(InitializeParams::default()).map_err(|e| {
            ClientError::Protocol {
                method: McpMethod::Initialize.as_str().to_string(),
                reason: e.to_string(),
            }
        })?;
        let result = self
            .request(McpMethod::Initialize, Some(params), self.settings.init_timeout)
            .await?;
        let init: InitializeResult = parse_result(McpMethod::Initialize, result)?;

        self.notify(McpMethod::Initialized).await?;
        let tools = self.list_tools().await?;

        let mut status = self.shared.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state != ConnectionState::Initializing {
            return Err(ClientError::ConnectionClosed(self.shared.name.clone()));
        }
        status.state = ConnectionState::Ready;
        status.tools = tools;
        status.server_info = init.server_info;
        info!(
            server = %self.shared.name,
            protocol = %init.protocol_version,
            remote = status.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            tools = status.tools.len(),
            "MCP connection ready"
        );
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self
                .request(McpMethod::ToolsList, params, self.settings.init_timeout)
                .await?;
            let page: ToolsListResult = parse_result(McpMethod::ToolsList, result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        warn!(server = %self.name(), pages = MAX_TOOL_PAGES, "tools/list pagination truncated");
        Ok(tools)
    }

    /// Invoke a tool by its server-side name.
    ///
    /// A result with `isError: true` is returned as `Ok`; the caller decides
    /// how to surface it.
    ///
    /// # Errors
    ///
    /// `NotReady` unless the connection is `Ready`; otherwise any request error.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, ClientError> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ClientError::NotReady {
                server: self.shared.name.clone(),
                state,
            });
        }

        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| ClientError::Protocol {
            method: McpMethod::ToolsCall.as_str().to_string(),
            reason: e.to_string(),
        })?;

        debug!(server = %self.shared.name, tool = name, "calling MCP tool");
        let result = self
            .request(McpMethod::ToolsCall, Some(params), self.settings.call_timeout)
            .await?;
        parse_result(McpMethod::ToolsCall, result)
    }

    async fn request(
        &self,
        method: McpMethod,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        // fail() may have drained the map before our insert
        if self.state() == ConnectionState::Failed {
            self.pending().remove(&id);
            return Err(ClientError::ConnectionClosed(self.shared.name.clone()));
        }

        // One deadline for queueing on the writer, writing and the reply
        let deadline = tokio::time::Instant::now() + timeout;
        let request = McpRequest::new(id, method.as_str(), params);
        let write = async { self.writer.lock().await.send(&request).await };
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pending().remove(&id);
                warn!(server = %self.shared.name, error = %e, "failed to write MCP request");
                return Err(ClientError::ConnectionClosed(self.shared.name.clone()));
            }
            Err(_) => {
                self.pending().remove(&id);
                warn!(server = %self.shared.name, method = method.as_str(), id, ?timeout, "MCP server is not reading requests");
                return Err(self.timeout_error(method, timeout));
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(|e| ClientError::Server {
                code: e.code,
                message: e.message,
            }),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed(self.shared.name.clone())),
            Err(_) => {
                self.pending().remove(&id);
                warn!(server = %self.shared.name, method = method.as_str(), id, ?timeout, "MCP request timed out");
                Err(self.timeout_error(method, timeout))
            }
        }
    }

    fn timeout_error(&self, method: McpMethod, timeout: Duration) -> ClientError {
        ClientError::Timeout {
            method: method.as_str().to_string(),
            timeout,
        }
    }

    async fn notify(&self, method: McpMethod) -> Result<(), ClientError> {
        let notification = McpNotification::new(method.as_str(), None);
        self.writer
            .lock()
            .await
            .send(&notification)
            .await
            .map_err(ClientError::from)
    }

    /// Tear the connection down and kill the server process.
    pub async fn close(&self) {
        let process = self
            .shared
            .process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.shared.fail("disconnected");
        if let Some(mut process) = process {
            if let Err(e) = process.kill().await {
                debug!(server = %self.shared.name, error = %e, "MCP server already gone");
            }
        }
        self.abort_reader();
    }

    fn abort_reader(&self) {
        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.shared.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state = state;
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Tools discovered during the handshake (empty unless `Ready`)
    pub fn tools(&self) -> Vec<Tool> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tools
            .clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .server_info
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_error
            .clone()
    }

    pub fn status(&self) -> ServerStatus {
        let status = self.shared.status.lock().unwrap_or_else(|e| e.into_inner());
        ServerStatus {
            name: self.shared.name.clone(),
            state: status.state,
            tool_count: status.tools.len(),
            last_error: status.last_error.clone(),
        }
    }

    /// Number of requests awaiting a response
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(
    method: McpMethod,
    value: serde_json::Value,
) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Protocol {
        method: method.as_str().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// In-process server: `handler` maps each incoming message to reply
    /// lines, or `None` to hang up.
    fn mock_server<F>(mut handler: F) -> StdioTransport
    where
        F: FnMut(&Value) -> Option<Vec<Value>> + Send + 'static,
    {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                let Some(replies) = handler(&message) else {
                    return;
                };
                for reply in replies {
                    let mut text = reply.to_string();
                    text.push('\n');
                    if server_write.write_all(text.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        });
        StdioTransport::from_io(client_read, client_write)
    }

    fn standard_reply(message: &Value) -> Option<Vec<Value>> {
        let Some(id) = message.get("id").cloned() else {
            return Some(vec![]);
        };
        let result = match message["method"].as_str().unwrap_or_default() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": {"name": "mock", "version": "1.0"}
            }),
            "tools/list" => json!({"tools": [{"name": "echo", "description": "Echo text"}]}),
            "tools/call" => json!({
                "content": [{"type": "text", "text": message["params"]["arguments"]["text"].clone()}]
            }),
            other => {
                return Some(vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": {"code": -32601, "message": format!("unknown method {other}")}
                })])
            }
        };
        Some(vec![json!({"jsonrpc": "2.0", "id": id, "result": result})])
    }

    #[derive(Default)]
    struct RecordingObserver {
        ready: Mutex<Vec<(String, usize)>>,
        failed: Mutex<Vec<(String, String)>>,
    }

    impl ConnectionObserver for RecordingObserver {
        fn on_ready(&self, connection: &Arc<McpConnection>) {
            self.ready
                .lock()
                .unwrap()
                .push((connection.name().to_string(), connection.tools().len()));
        }

        fn on_failed(&self, server: &str, reason: &str) {
            self.failed
                .lock()
                .unwrap()
                .push((server.to_string(), reason.to_string()));
        }
    }

    fn fast_settings() -> ConnectionSettings {
        ConnectionSettings {
            init_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let observer = Arc::new(RecordingObserver::default());
        let conn = McpConnection::connect(
            "mock",
            mock_server(standard_reply),
            fast_settings(),
            Some(observer.clone()),
        )
        .await
        .unwrap();

        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.tools().len(), 1);
        assert_eq!(conn.tools()[0].name, "echo");
        assert_eq!(conn.server_info().unwrap().name, "mock");
        assert_eq!(*observer.ready.lock().unwrap(), vec![("mock".to_string(), 1)]);
        assert!(observer.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handshake_message_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let transport = mock_server(move |message| {
            record
                .lock()
                .unwrap()
                .push(message["method"].as_str().unwrap_or_default().to_string());
            standard_reply(message)
        });
        McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[tokio::test]
    async fn test_initialize_error_fails_connection() {
        let observer = Arc::new(RecordingObserver::default());
        let transport = mock_server(|message| {
            let id = message.get("id").cloned()?;
            Some(vec![json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32603, "message": "boom"}
            })])
        });
        let err = McpConnection::connect("bad", transport, fast_settings(), Some(observer.clone()))
            .await
            .err()
            .unwrap();

        assert_eq!(
            err,
            ClientError::Server {
                code: -32603,
                message: "boom".to_string()
            }
        );
        assert!(observer.ready.lock().unwrap().is_empty());
        assert_eq!(observer.failed.lock().unwrap()[0].0, "bad");
    }

    #[tokio::test]
    async fn test_call_tool_returns_text() {
        let conn = McpConnection::connect("mock", mock_server(standard_reply), fast_settings(), None)
            .await
            .unwrap();
        let result = conn.call_tool("echo", json!({"text": "hello"})).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "hello");
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_is_error_result_is_returned() {
        let transport = mock_server(|message| match message["method"].as_str() {
            Some("tools/call") => Some(vec![json!({
                "jsonrpc": "2.0", "id": message["id"].clone(),
                "result": {"content": [{"type": "text", "text": "nope"}], "isError": true}
            })]),
            _ => standard_reply(message),
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();
        let result = conn.call_tool("echo", json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "nope");
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_matched_by_id() {
        // Hold the first call until the second arrives, then answer in reverse
        let mut held: Vec<Value> = Vec::new();
        let transport = mock_server(move |message| {
            if message["method"] != "tools/call" {
                return standard_reply(message);
            }
            held.push(message.clone());
            if held.len() < 2 {
                return Some(vec![]);
            }
            let replies = held
                .drain(..)
                .rev()
                .flat_map(|m| standard_reply(&m).unwrap_or_default())
                .collect();
            Some(replies)
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            conn.call_tool("echo", json!({"text": "first"})),
            conn.call_tool("echo", json!({"text": "second"}))
        );
        assert_eq!(a.unwrap().text(), "first");
        assert_eq!(b.unwrap().text(), "second");
    }

    #[tokio::test]
    async fn test_call_timeout_fails_only_that_call() {
        let transport = mock_server(|message| {
            if message["method"] == "tools/call"
                && message["params"]["arguments"]["text"] == "slow"
            {
                return Some(vec![]);
            }
            standard_reply(message)
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();

        let err = conn.call_tool("echo", json!({"text": "slow"})).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(conn.in_flight(), 0);

        assert_eq!(conn.state(), ConnectionState::Ready);
        let ok = conn.call_tool("echo", json!({"text": "fast"})).await.unwrap();
        assert_eq!(ok.text(), "fast");
    }

    #[tokio::test]
    async fn test_call_timeout_covers_blocked_write() {
        // Answers the handshake, then never reads stdin again
        let (client, server) = duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                let listed = message["method"] == "tools/list";
                for reply in standard_reply(&message).unwrap() {
                    let mut text = reply.to_string();
                    text.push('\n');
                    server_write.write_all(text.as_bytes()).await.unwrap();
                }
                if listed {
                    break;
                }
            }
            std::future::pending::<()>().await;
        });
        let transport = StdioTransport::from_io(client_read, client_write);
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();

        let big = "x".repeat(64 * 1024);
        let (first, second) = tokio::join!(
            conn.call_tool("echo", json!({ "text": big })),
            conn.call_tool("echo", json!({ "text": "queued" })),
        );
        assert!(matches!(first, Err(ClientError::Timeout { .. })), "{:?}", first);
        assert!(matches!(second, Err(ClientError::Timeout { .. })), "{:?}", second);
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_late_and_unmatched_responses_are_discarded() {
        let transport = mock_server(|message| {
            let mut replies = vec![json!({"jsonrpc": "2.0", "id": 999, "result": {}})];
            replies.extend(standard_reply(message)?);
            Some(replies)
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();
        let result = conn.call_tool("echo", json!({"text": "still works"})).await.unwrap();
        assert_eq!(result.text(), "still works");
    }

    #[tokio::test]
    async fn test_server_initiated_messages_are_ignored() {
        let transport = mock_server(|message| {
            let mut replies = vec![
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}}),
                json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}),
            ];
            replies.extend(standard_reply(message)?);
            Some(replies)
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn test_eof_mid_call_fails_call_and_connection() {
        let observer = Arc::new(RecordingObserver::default());
        let transport = mock_server(|message| {
            if message["method"] == "tools/call" {
                return None;
            }
            standard_reply(message)
        });
        let conn = McpConnection::connect("crashy", transport, fast_settings(), Some(observer.clone()))
            .await
            .unwrap();

        let err = conn.call_tool("echo", json!({"text": "x"})).await.unwrap_err();
        assert_eq!(err, ClientError::ConnectionClosed("crashy".to_string()));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.last_error().as_deref(), Some("server closed stdout"));
        assert!(conn.tools().is_empty());
        assert_eq!(observer.failed.lock().unwrap().len(), 1);

        let err = conn.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotReady {
                state: ConnectionState::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_tools_list_follows_cursor() {
        let transport = mock_server(|message| {
            if message["method"] != "tools/list" {
                return standard_reply(message);
            }
            let page = if message["params"]["cursor"] == "page-2" {
                json!({"tools": [{"name": "b"}]})
            } else {
                json!({"tools": [{"name": "a"}], "nextCursor": "page-2"})
            };
            Some(vec![json!({"jsonrpc": "2.0", "id": message["id"].clone(), "result": page})])
        });
        let conn = McpConnection::connect("mock", transport, fast_settings(), None)
            .await
            .unwrap();
        let names: Vec<String> = conn.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_close_notifies_observer_once() {
        let observer = Arc::new(RecordingObserver::default());
        let conn = McpConnection::connect(
            "mock",
            mock_server(standard_reply),
            fast_settings(),
            Some(observer.clone()),
        )
        .await
        .unwrap();

        conn.close().await;
        conn.close().await;
        let status = conn.status();
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.tool_count, 0);
        assert_eq!(status.last_error.as_deref(), Some("disconnected"));
        assert_eq!(observer.failed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_transport_error_mapping() {
        let spawn = TransportError::Spawn {
            command: "nope".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(matches!(ClientError::from(spawn), ClientError::Spawn(_)));
        let io = TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(ClientError::from(io), ClientError::Io(_)));
    }
}
