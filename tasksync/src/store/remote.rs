//! WebSocket RPC client for the `tasksync-store` server.
//!
//! One connection carries every call. Each request gets a fresh `call_id`
//! and a oneshot channel parked in the pending map; a background reader
//! task routes responses back by `call_id`, so responses may arrive in any
//! order. When the connection drops, every outstanding call fails with
//! [`StoreError::Disconnected`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tasksync_proto::rpc::{self, RemoteError, RpcFrame, StoreCall, StoreReply};
use tasksync_proto::{CreateTaskRequest, Task, TaskId, UpdateTaskRequest};
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{StoreError, TaskStore, reply_deleted, reply_task, reply_tasks};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Calls waiting for a response, keyed by `call_id`.
type PendingCalls =
    Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Result<StoreReply, RemoteError>>>>>;

/// Task store reached over a WebSocket connection.
///
/// Created via [`RemoteStore::connect`], which establishes the connection
/// and spawns the background reader task.
pub struct RemoteStore {
    /// The store URL (ws:// or wss://).
    url: String,
    /// Write half of the WebSocket connection (shared for concurrent calls).
    ws_sender: Mutex<WsSender>,
    pending: PendingCalls,
    next_call_id: AtomicU64,
    /// Whether the connection is still up.
    connected: Arc<AtomicBool>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl RemoteStore {
    /// Connects to a store server.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`] if the connection is not established within
    ///   `connect_timeout`.
    /// - [`StoreError::Unreachable`] if nothing is listening at `url`.
    /// - [`StoreError::Io`] for TLS, HTTP and other connection failures.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "store connect timed out");
                StoreError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "store connect failed");
                map_ws_connect_error(url, e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let pending: PendingCalls = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        tracing::info!(url, "connected to task store");

        Ok(Self {
            url: url.to_string(),
            ws_sender: Mutex::new(ws_sender),
            pending,
            next_call_id: AtomicU64::new(1),
            connected,
            reader_handle,
        })
    }

    /// The URL this store is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn call(&self, call: StoreCall) -> Result<StoreReply, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Disconnected);
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let name = call.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        // Removes the entry if this call is dropped (e.g. on timeout).
        let _guard = PendingGuard {
            pending: &self.pending,
            call_id,
        };
        // The reader clears the map after flipping `connected`; re-checking
        // here means an entry is never stranded after the reader is gone.
        if !self.is_connected() {
            return Err(StoreError::Disconnected);
        }

        let bytes = rpc::encode(&RpcFrame::Request { call_id, call })
            .map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut sender = self.ws_sender.lock().await;
            sender
                .send(Message::Binary(bytes.into()))
                .await
                .map_err(|e| {
                    tracing::warn!(call_id, call = name, err = %e, "store send failed");
                    self.connected.store(false, Ordering::SeqCst);
                    StoreError::Disconnected
                })?;
        }
        tracing::trace!(call_id, call = name, "store request sent");

        let outcome = rx.await.map_err(|_| StoreError::Disconnected)?;
        outcome.map_err(StoreError::from)
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    call_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.call_id);
    }
}

impl TaskStore for RemoteStore {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task, StoreError> {
        reply_task(self.call(StoreCall::CreateTask(req)).await?)
    }

    async fn update_task(&self, req: UpdateTaskRequest) -> Result<Task, StoreError> {
        reply_task(self.call(StoreCall::UpdateTask(req)).await?)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        reply_deleted(self.call(StoreCall::DeleteTask(id.clone())).await?)
    }

    async fn get_all_tasks(&self) -> Result<Option<Vec<Task>>, StoreError> {
        reply_tasks(self.call(StoreCall::GetAllTasks).await?)
    }

    async fn get_task_by_id(&self, id: &TaskId) -> Result<Task, StoreError> {
        reply_task(self.call(StoreCall::GetTaskById(id.clone())).await?)
    }
}

/// Background task that reads responses and hands them to waiting calls.
///
/// Malformed frames are logged and skipped; the connection stays open.
/// On close or read error, marks the store disconnected and drops every
/// pending sender so the waiting calls fail.
async fn reader_loop(mut ws_reader: WsReader, pending: PendingCalls, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match rpc::decode(&data) {
                Ok(RpcFrame::Response { call_id, outcome }) => {
                    let waiter = pending.lock().remove(&call_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => {
                            tracing::debug!(call_id, "response for abandoned call");
                        }
                    }
                }
                Ok(RpcFrame::Request { call_id, .. }) => {
                    tracing::warn!(call_id, "unexpected request frame from store");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store closed the connection");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "store WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    let abandoned = {
        let mut pending = pending.lock();
        let count = pending.len();
        pending.clear();
        count
    };
    tracing::info!(abandoned, "store reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`StoreError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> StoreError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            StoreError::Unreachable(url.to_string())
        }
        WsError::Io(io_err) => StoreError::from(io_err),
        WsError::Tls(_) => StoreError::Io(format!("TLS error: {err}")),
        WsError::Http(response) => {
            StoreError::Io(format!("store HTTP error: status {}", response.status()))
        }
        other => StoreError::Io(format!("store connection error: {other}")),
    }
}
