//! In-memory tool servers for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::DestinationConfig;
use crate::protocol::types::error_codes;
use crate::protocol::{ClientError, Connector, Tool, ToolClient};

/// Behaviour of one fake destination.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub tools: Vec<Tool>,
    /// Delay before every `tools/call` answers.
    pub call_delay: Duration,
    /// The first N `tools/call` requests fail with a server error.
    pub failing_calls: u32,
    /// `tools/list` fails with a transport error.
    pub fail_list: bool,
}

impl FakeServer {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names
                .iter()
                .map(|n| Tool::new(*n, Some(format!("{n} description").as_str())))
                .collect(),
            ..Self::default()
        }
    }

    pub fn call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn failing_calls(mut self, n: u32) -> Self {
        self.failing_calls = n;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    connects: u32,
    closes: u32,
    calls: u32,
}

type SharedStats = Arc<Mutex<HashMap<String, Stats>>>;

fn with_stats<R>(stats: &SharedStats, id: &str, f: impl FnOnce(&mut Stats) -> R) -> R {
    let mut map = stats.lock().unwrap();
    f(map.entry(id.to_string()).or_default())
}

#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    failing_connect: HashSet<String>,
    connect_delay: Duration,
    stats: SharedStats,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, id: &str, server: FakeServer) -> Self {
        self.servers.insert(id.to_string(), server);
        self
    }

    pub fn with_failing_connect(mut self, id: &str) -> Self {
        self.failing_connect.insert(id.to_string());
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connect_count(&self, id: &str) -> u32 {
        with_stats(&self.stats, id, |s| s.connects)
    }

    pub fn close_count(&self, id: &str) -> u32 {
        with_stats(&self.stats, id, |s| s.closes)
    }

    pub fn call_count(&self, id: &str) -> u32 {
        with_stats(&self.stats, id, |s| s.calls)
    }

    /// Simulate the process for `id` exiting.
    pub fn kill(&self, id: &str) {
        for client in self.clients.lock().unwrap().iter() {
            if client.server == id {
                client.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, destination: &DestinationConfig) -> Result<Arc<dyn ToolClient>, ClientError> {
        let id = destination.id.as_str();
        with_stats(&self.stats, id, |s| s.connects += 1);

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let server = match self.servers.get(id) {
            Some(server) if !self.failing_connect.contains(id) => server.clone(),
            _ => {
                return Err(ClientError::Spawn {
                    server: id.to_string(),
                    reason: "No such file or directory (os error 2)".into(),
                })
            }
        };

        let client = Arc::new(FakeClient {
            server: id.to_string(),
            spec: server,
            alive: AtomicBool::new(true),
            stats: Arc::clone(&self.stats),
        });
        self.clients.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }
}

pub struct FakeClient {
    server: String,
    spec: FakeServer,
    alive: AtomicBool,
    stats: SharedStats,
}

#[async_trait]
impl ToolClient for FakeClient {
    fn server_name(&self) -> &str {
        &self.server
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ClientError::Closed {
                server: self.server.clone(),
            });
        }

        match method {
            "ping" => Ok(json!({})),
            "tools/list" if self.spec.fail_list => Err(ClientError::Transport {
                server: self.server.clone(),
                reason: "broken pipe".into(),
            }),
            "tools/list" => Ok(json!({ "tools": self.spec.tools })),
            "tools/call" => {
                let n = with_stats(&self.stats, &self.server, |s| {
                    s.calls += 1;
                    s.calls
                });
                if !self.spec.call_delay.is_zero() {
                    tokio::time::sleep(self.spec.call_delay).await;
                }
                if n <= self.spec.failing_calls {
                    return Err(ClientError::Server {
                        code: -32000,
                        message: format!("call {n} failed"),
                        data: None,
                    });
                }
                let params = params.unwrap_or(Value::Null);
                Ok(json!({
                    "content": [{"type": "text", "text": format!("{} ok", params["name"].as_str().unwrap_or(""))}],
                    "arguments": params["arguments"],
                }))
            }
            other => Err(ClientError::Server {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
                data: None,
            }),
        }
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.alive.store(false, Ordering::SeqCst);
        with_stats(&self.stats, &self.server, |s| s.closes += 1);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
