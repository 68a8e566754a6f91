//! MCP client: manages one server connection.
//!
//! The client owns the process lifecycle, correlates concurrent requests with
//! their responses, performs the `initialize` handshake, and exposes the
//! `tools/list` and `tools/call` façade. When no server is running, the tool
//! façade answers from a local [`ToolRegistry`] instead.

use crate::config::McpServerConfig;
use crate::dispatch::HandlerRegistry;
use crate::error::McpError;
use crate::jsonrpc::{IdAllocator, Notification, Request, RequestId, Response};
use crate::pending::PendingTable;
use crate::protocol::{
    Implementation, InitializeResult, PROTOCOL_VERSION, ServerCapabilities, ToolDescriptor,
    ToolInvocationResult, ToolList,
};
use crate::transport::{self, Connection, LineWriter, TransportIo};
use bond_tools::ToolRegistry;
use bond_types::Tool;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;

/// Name we report in `clientInfo`.
const CLIENT_NAME: &str = "bond";

/// Notification a server sends when its tool set changes.
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// Lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// The server process died or closed its output while running.
    Exited,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClientState::NotStarted => "not started",
            ClientState::Starting => "starting",
            ClientState::Running => "running",
            ClientState::Stopping => "stopping",
            ClientState::Stopped => "stopped",
            ClientState::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// State shared between the client and its background tasks.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) state: watch::Sender<ClientState>,
    pub(crate) pending: PendingTable,
    pub(crate) handlers: HandlerRegistry,
}

impl Shared {
    /// The server went away: move to `Exited` (if we were live) and fail
    /// every waiting request.
    pub(crate) fn connection_lost(&self, reason: &str) {
        let exited = self.state.send_if_modified(|state| {
            if matches!(state, ClientState::Running | ClientState::Starting) {
                *state = ClientState::Exited;
                true
            } else {
                false
            }
        });
        if exited {
            tracing::warn!("MCP server '{}' connection lost: {}", self.name, reason);
        }
        let failed = self.pending.close_all(|_| McpError::ProcessExited {
            name: self.name.clone(),
            reason: reason.to_string(),
        });
        if failed > 0 {
            tracing::debug!(
                "Failed {} pending request(s) to MCP server '{}'",
                failed,
                self.name
            );
        }
    }
}

/// Client for a single MCP server.
pub struct McpClient {
    shared: Arc<Shared>,
    config: McpServerConfig,
    registry: Arc<ToolRegistry>,
    ids: IdAllocator,
    default_timeout_ms: AtomicU64,
    connection: Mutex<Option<Connection>>,
    session: RwLock<Option<InitializeResult>>,
}

impl McpClient {
    /// Create a client with an empty local fallback registry. Nothing is
    /// spawned until [`start`](Self::start).
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self::with_registry(name, config, Arc::new(ToolRegistry::new()))
    }

    /// Create a client whose tool façade falls back to `registry`.
    pub fn with_registry(
        name: impl Into<String>,
        config: McpServerConfig,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::NotStarted);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state,
                pending: PendingTable::new(),
                handlers: HandlerRegistry::new(),
            }),
            default_timeout_ms: AtomicU64::new(config.timeout_ms),
            config,
            registry,
            ids: IdAllocator::new(),
            connection: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    /// Spawn, handshake, and return a running client.
    pub async fn connect(name: impl Into<String>, config: McpServerConfig) -> Result<Self, McpError> {
        let client = Self::new(name, config);
        client.start().await?;
        Ok(client)
    }

    /// The server name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// The local registry used when no server is running.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Add a tool to the local fallback registry.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<(), bond_types::ToolError> {
        self.registry.register(tool)
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// Watch lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Change the timeout used by [`call`](Self::call). Zero means no deadline.
    pub fn set_default_timeout(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.default_timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }

    /// Handle server notifications for `method`, replacing any previous handler.
    pub fn register_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.handlers.register(method, handler);
    }

    /// Returns `true` if a handler was removed.
    pub fn remove_handler(&self, method: &str) -> bool {
        self.shared.handlers.remove(method)
    }

    /// Spawn the configured server process and negotiate capabilities.
    ///
    /// A failed handshake is logged, not returned: the server stays running.
    pub async fn start(&self) -> Result<(), McpError> {
        let previous = self.begin_start().await?;
        match transport::spawn_process(&self.shared.name, &self.config) {
            Ok((child, io)) => self.finish_start(io, Some(child)).await,
            Err(e) => {
                self.shared.state.send_replace(previous);
                Err(e)
            }
        }
    }

    /// Like [`start`](Self::start), over already-connected streams.
    ///
    /// There is no process to watch: EOF on `io`'s reader counts as the
    /// server exiting.
    pub async fn start_with_io(&self, io: TransportIo) -> Result<(), McpError> {
        self.begin_start().await?;
        self.finish_start(io, None).await
    }

    /// Move to `Starting`, tearing down any connection left from a previous run.
    async fn begin_start(&self) -> Result<ClientState, McpError> {
        let mut previous = ClientState::NotStarted;
        let claimed = self.shared.state.send_if_modified(|state| {
            previous = *state;
            if matches!(
                state,
                ClientState::NotStarted | ClientState::Stopped | ClientState::Exited
            ) {
                *state = ClientState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(McpError::AlreadyRunning {
                name: self.shared.name.clone(),
            });
        }
        let stale = self.connection.lock().unwrap().take();
        if let Some(connection) = stale {
            connection.shutdown(self.config.shutdown_timeout()).await;
            // The old watcher reports its exit as a lost connection.
            self.shared.state.send_replace(ClientState::Starting);
        }
        Ok(previous)
    }

    async fn finish_start(&self, io: TransportIo, child: Option<Child>) -> Result<(), McpError> {
        let name = self.shared.name.clone();
        self.shared.pending.open();
        let installed = self.shared.handlers.register_default(TOOLS_LIST_CHANGED, {
            let name = name.clone();
            move |_| {
                let name = name.clone();
                async move {
                    tracing::debug!("MCP server '{}' reports its tool list changed", name);
                }
            }
        });
        if installed {
            tracing::debug!("Installed default '{}' handler", TOOLS_LIST_CHANGED);
        }

        let connection = Connection::open(
            io,
            child,
            Arc::clone(&self.shared),
            self.config.shutdown_timeout(),
        );
        *self.connection.lock().unwrap() = Some(connection);

        let running = self.shared.state.send_if_modified(|state| {
            if *state == ClientState::Starting {
                *state = ClientState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            return Err(McpError::ProcessExited {
                name,
                reason: "exited during startup".to_string(),
            });
        }
        tracing::info!("MCP server '{}' started", name);

        match self.negotiate().await {
            Ok(caps) => tracing::debug!(
                "MCP server '{}' capabilities: tools={}",
                name,
                caps.supports_tools()
            ),
            Err(e) => tracing::warn!("Capability negotiation with '{}' failed: {}", name, e),
        }
        Ok(())
    }

    /// Close the server's stdin, wait for it to exit (killing it after the
    /// shutdown grace period), and fail any requests still in flight.
    ///
    /// Stopping a client whose server already exited succeeds.
    pub async fn stop(&self) -> Result<(), McpError> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if matches!(state, ClientState::Running | ClientState::Exited) {
                *state = ClientState::Stopping;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(self.not_running());
        }

        let connection = self.connection.lock().unwrap().take();
        if let Some(connection) = connection {
            connection.shutdown(self.config.shutdown_timeout()).await;
        }
        self.shared.pending.close_all(|_| McpError::ProcessExited {
            name: self.shared.name.clone(),
            reason: "client stopped".to_string(),
        });
        self.shared.state.send_replace(ClientState::Stopped);
        tracing::info!("MCP server '{}' stopped", self.shared.name);
        Ok(())
    }

    fn not_running(&self) -> McpError {
        McpError::NotRunning {
            name: self.shared.name.clone(),
        }
    }

    fn writer(&self) -> Result<LineWriter, McpError> {
        if !self.is_running() {
            return Err(self.not_running());
        }
        self.connection
            .lock()
            .unwrap()
            .as_ref()
            .map(Connection::writer)
            .ok_or_else(|| self.not_running())
    }

    /// Send a request and wait for its response using the default timeout.
    ///
    /// A JSON-RPC error reply is returned as a [`Response`], not an `Err`.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Response, McpError> {
        self.call_with_timeout(method, params, self.default_timeout())
            .await
    }

    /// Send a request and wait up to `timeout` (zero: forever) for its response.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response, McpError> {
        let writer = self.writer()?;
        let id = self.ids.next_id();
        let line = Request::new(id.clone(), method, params).encode()?;

        // Dropping the guard on any exit path (including cancellation of this
        // future) removes the pending entry.
        let (_guard, rx) = self
            .shared
            .pending
            .register(id, method)
            .ok_or_else(|| self.not_running())?;

        // The deadline covers the write too: a server that stops reading its
        // stdin must not hold the caller past `timeout`.
        let exchange = async {
            writer
                .write_line(line)
                .await
                .map_err(|source| McpError::Write {
                    name: self.shared.name.clone(),
                    source,
                })?;
            rx.await.unwrap_or_else(|_| {
                Err(McpError::ProcessExited {
                    name: self.shared.name.clone(),
                    reason: "response channel closed".to_string(),
                })
            })
        };

        if timeout.is_zero() {
            return exchange.await;
        }
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                name: self.shared.name.clone(),
                method: method.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Like [`call`](Self::call), but a JSON-RPC error reply becomes
    /// [`McpError::Server`].
    pub async fn call_result(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let response = self.call(method, params).await?;
        response.into_result().map_err(|err| McpError::Server {
            server: self.shared.name.clone(),
            code: err.code,
            message: err.message,
            data: err.data,
        })
    }

    /// Send a notification. No id is consumed and no reply is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let writer = self.writer()?;
        let line = Request::notification(method, params).encode()?;
        writer
            .write_line(line)
            .await
            .map_err(|source| McpError::Write {
                name: self.shared.name.clone(),
                source,
            })
    }

    /// Run the `initialize` handshake and store what the server advertises.
    ///
    /// Without a running server this returns [`ServerCapabilities::fallback`].
    pub async fn negotiate(&self) -> Result<ServerCapabilities, McpError> {
        if !self.is_running() {
            return Ok(ServerCapabilities::fallback());
        }
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.call_result("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;
        let capabilities = init.capabilities.clone();
        if init.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                "MCP server '{}' speaks protocol version '{}'",
                self.shared.name,
                init.protocol_version
            );
        }
        *self.session.write().unwrap() = Some(init);

        if let Err(e) = self.notify("notifications/initialized", None).await {
            tracing::warn!(
                "Failed to send initialized notification to '{}': {}",
                self.shared.name,
                e
            );
        }
        Ok(capabilities)
    }

    /// Capabilities from the last handshake, or the fallback set before one.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.session
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.capabilities.clone())
            .unwrap_or_else(ServerCapabilities::fallback)
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.session
            .read()
            .unwrap()
            .as_ref()
            .and_then(|s| s.server_info.clone())
    }

    /// Protocol version the server answered with.
    pub fn protocol_version(&self) -> Option<String> {
        self.session
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// One page of tools from the server, or the local registry when no
    /// server is running.
    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<ToolList, McpError> {
        if !self.is_running() {
            return Ok(self.local_tools());
        }
        let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
        let result = match self.call_result("tools/list", params).await {
            Ok(result) => result,
            Err(e) if e.is_not_running() => return Ok(self.local_tools()),
            Err(e) => return Err(e),
        };
        let mut list: ToolList = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/list result: {e}")))?;
        if list.next_cursor.as_deref() == Some("") {
            list.next_cursor = None;
        }
        Ok(list)
    }

    /// Every tool, following `nextCursor` until the server stops returning one.
    pub async fn list_all_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_tools(cursor.as_deref()).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(McpError::Protocol(format!(
                            "tools/list returned cursor '{next}' twice"
                        )));
                    }
                    cursor = Some(next);
                }
                None => return Ok(tools),
            }
        }
    }

    /// Invoke a tool on the server, or on the local registry when no server
    /// is running.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolInvocationResult, McpError> {
        if !self.is_running() {
            return self.call_local_tool(name, arguments).await;
        }
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments.clone(),
        });
        match self.call_result("tools/call", Some(params)).await {
            Ok(result) => ToolInvocationResult::from_value(result),
            Err(e) if e.is_not_running() => self.call_local_tool(name, arguments).await,
            Err(e) => Err(e),
        }
    }

    fn local_tools(&self) -> ToolList {
        ToolList {
            tools: self
                .registry
                .definitions()
                .into_iter()
                .map(ToolDescriptor::from)
                .collect(),
            next_cursor: None,
        }
    }

    async fn call_local_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolInvocationResult, McpError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound {
                name: name.to_string(),
            })?;
        match tool.execute(arguments).await {
            Ok(output) => Ok(ToolInvocationResult::text(output)),
            Err(e) => Ok(ToolInvocationResult::error(format!(
                "Error executing tool: {e}"
            ))),
        }
    }

    /// Ids of requests still awaiting a response.
    pub fn pending_requests(&self) -> Vec<RequestId> {
        self.shared.pending.ids()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether a response for `id` is still awaited.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.shared.pending.contains(id)
    }
}
