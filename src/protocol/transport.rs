//! JSON-RPC over stdio transport.
//!
//! Line-delimited JSON (one object per line). A background reader task
//! routes each response to the request that is waiting for it, so any
//! number of requests can be in flight on one channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::errors::ClientError;
use super::types::{error_codes, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

type SharedWriter = Arc<AsyncMutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type PendingMap = Arc<DashMap<u64, oneshot::Sender<JsonRpcResponse>>>;

/// Bi-directional JSON-RPC transport over a pair of byte streams
/// (normally a child process's stdout and stdin).
pub struct StdioTransport {
    server: String,
    writer: SharedWriter,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Removes an abandoned request from the pending map when its caller goes away.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl StdioTransport {
    /// Create a transport and start its reader task.
    pub fn new<R, W>(server: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(AsyncMutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            server.to_string(),
            reader,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            server: server.to_string(),
            writer,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader_task: Mutex::new(Some(reader_task)),
        }
    }

    /// Whether the peer has gone away or `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a request and wait for its matching response.
    ///
    /// Dropping the returned future abandons the request: the entry is
    /// removed and a late response is discarded by the reader.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed {
                server: self.server.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // The reader flips `closed` before draining, so a request registered
        // after the drain is caught here instead of waiting forever.
        if self.is_closed() {
            return Err(ClientError::Closed {
                server: self.server.clone(),
            });
        }

        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;

        let response = rx.await.map_err(|_| ClientError::Transport {
            server: self.server.clone(),
            reason: "server stdout closed (process may have exited)".into(),
        })?;

        extract_result(response)
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.write_message(&JsonRpcRequest::notification(method, params))
            .await
    }

    /// Close the write side, stop the reader and fail every pending request.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.pending.clear();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(server = %self.server, error = %e, "Error closing downstream stdin");
        }
    }

    async fn write_message(&self, message: &JsonRpcRequest) -> Result<(), ClientError> {
        let mut json = serde_json::to_string(message).map_err(|e| ClientError::Transport {
            server: self.server.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        write_line(&self.writer, &json)
            .await
            .map_err(|e| ClientError::Transport {
                server: self.server.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(task) = self
            .reader_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn read_loop<R>(
    server: String,
    reader: R,
    writer: SharedWriter,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(server = %server, "Downstream stdout closed");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "Failed to read downstream stdout");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match IncomingMessage::parse(trimmed) {
            Ok(IncomingMessage::Response(response)) => {
                let Some(id) = response.id.as_u64() else {
                    tracing::debug!(server = %server, id = %response.id, "Response with foreign id ignored");
                    continue;
                };
                match pending.remove(&id) {
                    Some((_, waiter)) => {
                        // Receiver may have timed out in the meantime.
                        let _ = waiter.send(response);
                    }
                    None => {
                        tracing::debug!(server = %server, id, "Discarding response for abandoned request");
                    }
                }
            }
            Ok(IncomingMessage::Request(request)) => match request.id {
                Some(id) => {
                    tracing::debug!(server = %server, method = %request.method, "Rejecting server-initiated request");
                    let reply = JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(
                            error_codes::METHOD_NOT_FOUND,
                            format!("method not supported by gateway: {}", request.method),
                        ),
                    );
                    if let Ok(mut json) = serde_json::to_string(&reply) {
                        json.push('\n');
                        if let Err(e) = write_line(&writer, &json).await {
                            tracing::debug!(server = %server, error = %e, "Failed to answer server request");
                        }
                    }
                }
                None => {
                    tracing::debug!(server = %server, method = %request.method, "Downstream notification");
                }
            },
            Err(_) => {
                // Not JSON-RPC; some servers print banners on stdout.
                tracing::debug!(server = %server, line = %trimmed, "Skipping non-JSON-RPC output");
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    pending.clear();
}

/// Extract the result from a JSON-RPC response, converting errors to `ClientError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<Value, ClientError> {
    if let Some(err) = response.error {
        return Err(ClientError::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(ClientError::Server {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}
