//! Store server: shared state, WebSocket RPC handler, and startup helpers.
//!
//! Each WebSocket binary message carries one [`RpcFrame::Request`]. The
//! request is executed against the shared [`TaskBook`] and answered with an
//! [`RpcFrame::Response`] echoing the request's `call_id`. Undecodable
//! frames are logged and skipped; the connection stays open.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tasksync_proto::rpc::{self, RemoteError, RpcFrame};
use tokio::sync::{Mutex, mpsc};

use crate::book::TaskBook;
use crate::config::DEFAULT_MAX_FRAME_SIZE;

/// Shared server state: the task book and frame limits.
pub struct StoreState {
    /// The tasks served by this store.
    pub book: Mutex<TaskBook>,
    /// Maximum accepted request frame size in bytes.
    max_frame_size: usize,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// Creates an empty store with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            book: Mutex::new(TaskBook::new()),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates a store with a custom frame size limit and initial book.
    #[must_use]
    pub fn with_config(max_frame_size: usize, book: TaskBook) -> Self {
        Self {
            book: Mutex::new(book),
            max_frame_size,
        }
    }

    /// Decodes and executes one request frame, returning the encoded response.
    ///
    /// Returns `None` when no response can be addressed (undecodable bytes
    /// or a frame that is not a request).
    pub async fn handle_frame(&self, data: &[u8]) -> Option<Vec<u8>> {
        let (call_id, call) = match rpc::decode(data) {
            Ok(RpcFrame::Request { call_id, call }) => (call_id, call),
            Ok(other) => {
                tracing::warn!(frame = ?other, "unexpected frame from client");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode request frame");
                return None;
            }
        };

        let outcome = if data.len() > self.max_frame_size {
            tracing::warn!(
                call_id,
                size = data.len(),
                max = self.max_frame_size,
                "request frame exceeds size limit"
            );
            Err(RemoteError::invalid(format!(
                "request too large: {} bytes (max {})",
                data.len(),
                self.max_frame_size
            )))
        } else {
            let name = call.name();
            let outcome = self.book.lock().await.execute(call);
            match &outcome {
                Ok(_) => tracing::debug!(call_id, call = name, "request served"),
                Err(e) => tracing::info!(call_id, call = name, error = %e, "request rejected"),
            }
            outcome
        };

        match rpc::encode(&RpcFrame::Response { call_id, outcome }) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(call_id, error = %e, "failed to encode response");
                None
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// A writer task drains responses from a channel onto the socket while the
/// reader loop executes requests. When either side finishes, the other is
/// aborted.
pub async fn handle_socket(socket: WebSocket, state: Arc<StoreState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tracing::info!("client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    if let Some(response) = reader_state.handle_frame(&data).await
                        && tx.send(Message::Binary(response.into())).is_err()
                    {
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!("received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    tracing::info!("client disconnected");
}

/// Starts the store server on the given address with an empty book and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: impl tokio::net::ToSocketAddrs,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StoreState::new())).await
}

/// Starts the store server with a pre-configured [`StoreState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: impl tokio::net::ToSocketAddrs,
    state: Arc<StoreState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/rpc", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "store server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
