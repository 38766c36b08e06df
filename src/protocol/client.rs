//! Downstream tool server clients.
//!
//! `ToolClient` is the seam the pool and router depend on: a connected peer
//! offering `request` and `close`. `Connector` produces clients from a
//! destination's launch spec. The stdio implementations spawn the server as
//! a child process and keep the handle so it can be probed and terminated.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::ClientError;
use super::transport::StdioTransport;
use super::types::{InitializeResult, ListToolsResult, ServerInfo, Tool, PROTOCOL_VERSION};
use crate::config::DestinationConfig;

/// Upper bound on `tools/list` pages followed for one server.
const MAX_LIST_PAGES: usize = 64;

/// How long a server gets to exit on its own after stdin closes.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A live connection to one downstream tool server.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Destination id this client talks to.
    fn server_name(&self) -> &str;

    /// Issue a JSON-RPC request and return its `result`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError>;

    /// Tear the connection down. Must be safe to call more than once.
    async fn close(&self) -> Result<(), ClientError>;

    /// Whether the peer is still reachable.
    fn is_alive(&self) -> bool {
        true
    }

    /// Fetch the full tool catalog, following pagination cursors.
    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self.request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(value).map_err(|e| ClientError::Protocol {
                    server: self.server_name().to_string(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            server = %self.server_name(),
            pages = MAX_LIST_PAGES,
            "tools/list pagination limit reached, catalog truncated"
        );
        Ok(tools)
    }

    /// Invoke one tool by its original (un-prefixed) name.
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ClientError> {
        let params = json!({
            "name": name,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });
        self.request("tools/call", Some(params)).await
    }
}

/// Creates connected clients for destinations.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, destination: &DestinationConfig) -> Result<Arc<dyn ToolClient>, ClientError>;
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

/// Spawns destinations as child processes speaking JSON-RPC over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    handshake_timeout: Duration,
}

impl StdioConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self, destination: &DestinationConfig) -> Result<Arc<dyn ToolClient>, ClientError> {
        let client = StdioToolClient::spawn(destination, self.handshake_timeout).await?;
        Ok(Arc::new(client))
    }
}

/// A running tool server process with its transport.
#[derive(Debug)]
pub struct StdioToolClient {
    server: String,
    transport: StdioTransport,
    child: Mutex<Option<Child>>,
    server_info: Option<ServerInfo>,
}

impl StdioToolClient {
    /// Spawn the server process and perform the initialization handshake.
    pub async fn spawn(destination: &DestinationConfig, handshake_timeout: Duration) -> Result<Self, ClientError> {
        let name = destination.id.as_str();

        let mut cmd = Command::new(&destination.command);
        cmd.args(&destination.args)
            .envs(&destination.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ClientError::Spawn {
            server: name.to_string(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ClientError::Spawn {
            server: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ClientError::Spawn {
            server: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(name.to_string(), stderr));
        }

        tracing::debug!(server = %name, pid = ?child.id(), "Server process spawned");

        let mut client = Self {
            server: name.to_string(),
            transport: StdioTransport::new(name, stdout, stdin),
            child: Mutex::new(Some(child)),
            server_info: None,
        };

        match tokio::time::timeout(handshake_timeout, client.handshake()).await {
            Ok(Ok(info)) => {
                client.server_info = info;
                Ok(client)
            }
            Ok(Err(e)) => {
                client.terminate().await;
                Err(ClientError::Handshake {
                    server: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                client.terminate().await;
                Err(ClientError::Handshake {
                    server: name.to_string(),
                    reason: format!("no initialize response within {}ms", handshake_timeout.as_millis()),
                })
            }
        }
    }

    /// Identity the server reported during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// OS process id, while the child is retained.
    pub fn pid(&self) -> Option<u32> {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Child::id)
    }

    async fn handshake(&self) -> Result<Option<ServerInfo>, ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": format!("mcp-gateway-{}", self.server),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let value = self.transport.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(value).map_err(|e| ClientError::Protocol {
            server: self.server.clone(),
            reason: format!("invalid initialize result: {e}"),
        })?;

        tracing::debug!(
            server = %self.server,
            protocol_version = ?init.protocol_version,
            server_info = ?init.server_info,
            "Handshake complete"
        );

        self.transport.notify("notifications/initialized", None).await?;
        Ok(init.server_info)
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    async fn terminate(&self) {
        self.transport.close().await;

        let child = self.child.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, %status, "Server process exited");
            }
            _ => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(server = %self.server, error = %e, "Failed to kill server process");
                } else {
                    tracing::debug!(server = %self.server, "Server process killed");
                }
            }
        }
    }
}

#[async_trait]
impl ToolClient for StdioToolClient {
    fn server_name(&self) -> &str {
        &self.server
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.transport.request(method, params).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.terminate().await;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        if self.transport.is_closed() {
            return false;
        }
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) | None => false,
        }
    }
}

async fn forward_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, stderr = %line, "Downstream stderr");
    }
}
