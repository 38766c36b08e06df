//! Upstream JSON-RPC endpoint.
//!
//! # Responsibilities
//! - Read line-delimited JSON-RPC requests from the upstream peer
//! - Dispatch each request on its own task
//! - Serialize every response through a single writer
//!
//! # Design Decisions
//! - stdout belongs to the protocol; nothing else may write to it
//! - Notifications and stray responses are ignored
//! - On EOF outstanding requests are drained before returning

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::gateway::router::GatewayRouter;
use crate::observability::spans;
use crate::protocol::types::{error_codes, CallToolParams, PROTOCOL_VERSION};
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Name announced in the `initialize` response.
pub const SERVER_NAME: &str = "mcp-gateway";

/// How long in-flight requests get to finish once shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const RESPONSE_QUEUE: usize = 256;

pub struct GatewayServer {
    router: Arc<GatewayRouter>,
}

impl GatewayServer {
    pub fn new(router: Arc<GatewayRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<GatewayRouter> {
        &self.router
    }

    /// Serve requests from `reader` until EOF or shutdown.
    pub async fn run<R, W>(&self, reader: R, writer: W, mut shutdown: broadcast::Receiver<()>) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let mut lines = BufReader::new(reader).lines();
        let mut tasks = JoinSet::new();
        let mut stopping = false;

        tracing::info!("Upstream endpoint ready on stdio");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Upstream endpoint received shutdown signal");
                    stopping = true;
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Request task failed");
                    }
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(request) = self.accept(&line, &tx).await {
                            let router = Arc::clone(&self.router);
                            let tx = tx.clone();
                            tasks.spawn(async move {
                                let span = spans::upstream_request_span(
                                    &request.method,
                                    request.id.as_ref().unwrap_or(&Value::Null),
                                );
                                let response = dispatch(&router, request).instrument(span).await;
                                if tx.send(response).await.is_err() {
                                    tracing::warn!("Upstream writer gone, response dropped");
                                }
                            });
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Upstream closed stdin");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read from upstream");
                        break;
                    }
                },
            }
        }

        drain(&mut tasks, stopping).await;
        drop(tx);

        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        }
    }

    /// Decode one line. Replies directly to malformed input and returns the
    /// request only when it expects a response.
    async fn accept(&self, line: &str, tx: &mpsc::Sender<JsonRpcResponse>) -> Option<JsonRpcRequest> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable upstream message");
                let error = JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {e}"));
                let _ = tx.send(JsonRpcResponse::failure(Value::Null, error)).await;
                return None;
            }
        };

        if value.get("method").is_none() {
            tracing::debug!("Ignoring upstream message without a method");
            return None;
        }

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) if request.is_notification() => {
                tracing::debug!(method = %request.method, "Upstream notification");
                None
            }
            Ok(request) => Some(request),
            Err(e) => {
                let error = JsonRpcError::new(error_codes::INVALID_REQUEST, format!("Invalid request: {e}"));
                let _ = tx.send(JsonRpcResponse::failure(id, error)).await;
                None
            }
        }
    }
}

async fn drain(tasks: &mut JoinSet<()>, stopping: bool) {
    if tasks.is_empty() {
        return;
    }
    tracing::debug!(outstanding = tasks.len(), "Draining upstream requests");

    if !stopping {
        while tasks.join_next().await.is_some() {}
        return;
    }

    let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if finished.is_err() {
        tracing::warn!(outstanding = tasks.len(), "Aborting requests still running at shutdown");
        tasks.abort_all();
    }
}

async fn dispatch(router: &GatewayRouter, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_result()),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => {
            let tools = router.list_tools().await;
            JsonRpcResponse::success(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let params = match request.params.map(serde_json::from_value::<CallToolParams>) {
                Some(Ok(params)) => params,
                Some(Err(e)) => {
                    let error = JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Invalid params: {e}"));
                    return JsonRpcResponse::failure(id, error);
                }
                None => {
                    let error = JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing params for tools/call");
                    return JsonRpcResponse::failure(id, error);
                }
            };

            match router.call_tool(&params.name, params.arguments).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => {
                    tracing::warn!(tool = %params.name, kind = %e.kind(), error = %e, "Tool call failed");
                    JsonRpcResponse::failure(id, e.to_rpc_error())
                }
            }
        }
        other => {
            tracing::debug!(method = %other, "Unsupported upstream method");
            JsonRpcResponse::failure(
                id,
                JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
            )
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<JsonRpcResponse>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
