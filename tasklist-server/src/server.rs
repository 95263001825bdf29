//! Store server core: shared state, WebSocket handler, request dispatch, and
//! change-feed fan-out.
//!
//! Each WebSocket connection gets a writer task fed by an unbounded channel,
//! so responses and change notifications for one connection are delivered
//! in the order they were produced. Subscriptions belong to the connection
//! that opened them and are dropped when it goes away.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tasklist_proto::codec;
use tasklist_proto::filter::RowFilter;
use tasklist_proto::store::{
    ChangeEvent, ChangeKind, DEFAULT_MAX_FRAME_SIZE, RequestId, StoreError, StoreMessage,
    StoreOp, StoreReply, SubscriptionId, TASKS_TABLE,
};
use tasklist_proto::task::Task;
use tokio::sync::{RwLock, mpsc};

use crate::table::TaskTable;

/// Identifies one WebSocket connection for the lifetime of the server.
type ConnId = u64;

/// An open change feed.
struct Subscriber {
    conn: ConnId,
    channel: String,
    filter: RowFilter,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared server state: the table, live connections, and open feeds.
pub struct ServerState {
    /// The `tasks` table.
    pub table: TaskTable,
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<Message>>>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_conn: AtomicU64,
    max_frame_size: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates an empty store with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE, TaskTable::new())
    }

    /// Creates a store with a custom frame size limit and table.
    #[must_use]
    pub fn with_config(max_frame_size: usize, table: TaskTable) -> Self {
        Self {
            table,
            connections: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            max_frame_size,
        }
    }

    /// Number of open change feeds across all connections.
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Send a WebSocket Close frame to every connected client.
    ///
    /// Useful for graceful shutdown and for testing client disconnect
    /// handling.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn, sender) in conns.iter() {
            tracing::info!(conn = conn, "sending close frame to client");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Registers a feed and acknowledges it to the client.
    ///
    /// The acknowledgement is queued while the subscriber map is still write
    /// locked, so no change for the new feed can overtake it.
    async fn subscribe(
        &self,
        conn: ConnId,
        request: RequestId,
        channel: String,
        filter: RowFilter,
        sender: &mpsc::UnboundedSender<Message>,
    ) {
        let id = SubscriptionId::new();
        tracing::info!(conn = conn, subscription = %id, channel = %channel, "feed opened");
        let mut subs = self.subscribers.write().await;
        subs.insert(
            id,
            Subscriber {
                conn,
                channel,
                filter,
                sender: sender.clone(),
            },
        );
        send_on(
            sender,
            &StoreMessage::Response {
                id: request,
                result: Ok(StoreReply::Subscribed(id)),
            },
        );
    }

    async fn unsubscribe(&self, conn: ConnId, id: SubscriptionId) {
        let mut subs = self.subscribers.write().await;
        // Only the owning connection may close a feed.
        if subs.get(&id).is_some_and(|s| s.conn == conn)
            && let Some(sub) = subs.remove(&id)
        {
            tracing::info!(conn = conn, subscription = %id, channel = %sub.channel, "feed closed");
        }
    }

    async fn drop_connection(&self, conn: ConnId) {
        self.connections.write().await.remove(&conn);
        let mut subs = self.subscribers.write().await;
        let before = subs.len();
        subs.retain(|_, s| s.conn != conn);
        let dropped = before - subs.len();
        if dropped > 0 {
            tracing::info!(conn = conn, count = dropped, "dropped feeds of closed connection");
        }
    }

    /// Pushes a change for `task` to every feed whose filter matches it.
    async fn publish(&self, kind: ChangeKind, task: &Task) {
        let subs = self.subscribers.read().await;
        for (id, sub) in subs.iter().filter(|(_, s)| s.filter.matches(task)) {
            let msg = StoreMessage::Change {
                subscription: *id,
                event: ChangeEvent {
                    kind,
                    table: TASKS_TABLE.to_string(),
                    task_id: task.id,
                },
            };
            tracing::debug!(subscription = %id, kind = %kind, task_id = %task.id, "publishing change");
            send_on(&sub.sender, &msg);
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Allocate a connection id and writer channel.
/// 2. Serve requests until the client closes or the socket fails.
/// 3. Drop the connection's feeds.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.connections.write().await.insert(conn, tx.clone());
    tracing::info!(conn = conn, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = conn, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(conn, &data, &tx, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn = conn, "received close frame");
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

    state.drop_connection(conn).await;
    tracing::info!(conn = conn, "client disconnected");
}

/// Handles one binary frame from a client.
async fn handle_binary_message(
    conn: ConnId,
    data: &[u8],
    tx: &mpsc::UnboundedSender<Message>,
    state: &Arc<ServerState>,
) {
    let oversized = data.len() > state.max_frame_size;
    let too_large = StoreError::TooLarge {
        size: data.len(),
        max: state.max_frame_size,
    };

    let msg = match codec::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn = conn, size = data.len(), error = %e, "failed to decode frame");
            let reason = if oversized {
                too_large.to_string()
            } else {
                format!("malformed frame: {e}")
            };
            send_on(tx, &StoreMessage::Error { reason });
            return;
        }
    };

    if oversized {
        tracing::warn!(
            conn = conn,
            size = data.len(),
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        // Requests get a correlated failure so the caller can roll back.
        let reply = match msg {
            StoreMessage::Request { id, .. } => StoreMessage::Response {
                id,
                result: Err(too_large),
            },
            _ => StoreMessage::Error {
                reason: too_large.to_string(),
            },
        };
        send_on(tx, &reply);
        return;
    }

    match msg {
        StoreMessage::Request { id, op } => {
            handle_request(conn, id, op, tx, state).await;
        }
        other => {
            tracing::warn!(conn = conn, msg = ?other, "unexpected message type from client");
        }
    }
}

/// Executes one request, replies, then publishes any resulting changes.
async fn handle_request(
    conn: ConnId,
    id: RequestId,
    op: StoreOp,
    tx: &mpsc::UnboundedSender<Message>,
    state: &Arc<ServerState>,
) {
    let mut changes: Vec<(ChangeKind, Task)> = Vec::new();

    let result = match op {
        StoreOp::Select(query) => {
            let rows = state.table.select(&query).await;
            tracing::debug!(conn = conn, request = %id, rows = rows.len(), "select");
            Ok(StoreReply::Rows(rows))
        }
        StoreOp::Insert { row, returning } => match state.table.insert(row).await {
            Ok(task) => {
                tracing::info!(conn = conn, request = %id, task_id = %task.id, "insert");
                changes.push((ChangeKind::Insert, task.clone()));
                if returning {
                    Ok(StoreReply::Rows(vec![task]))
                } else {
                    Ok(StoreReply::Affected(1))
                }
            }
            Err(e) => {
                tracing::warn!(conn = conn, request = %id, error = %e, "insert rejected");
                Err(e)
            }
        },
        StoreOp::Update { filter, patch } => {
            let updated = state.table.update(&filter, patch).await;
            tracing::info!(conn = conn, request = %id, rows = updated.len(), "update");
            let count = updated.len() as u64;
            changes.extend(updated.into_iter().map(|t| (ChangeKind::Update, t)));
            Ok(StoreReply::Affected(count))
        }
        StoreOp::Delete { filter } => {
            let removed = state.table.delete(&filter).await;
            tracing::info!(conn = conn, request = %id, rows = removed.len(), "delete");
            let count = removed.len() as u64;
            changes.extend(removed.into_iter().map(|t| (ChangeKind::Delete, t)));
            Ok(StoreReply::Affected(count))
        }
        StoreOp::Subscribe { channel, filter } => {
            state.subscribe(conn, id, channel, filter, tx).await;
            return;
        }
        StoreOp::Unsubscribe { subscription } => {
            state.unsubscribe(conn, subscription).await;
            Ok(StoreReply::Unsubscribed)
        }
    };

    send_on(tx, &StoreMessage::Response { id, result });

    for (kind, task) in &changes {
        state.publish(*kind, task).await;
    }
}

/// Encodes a message and queues it on a connection's writer channel.
fn send_on(tx: &mpsc::UnboundedSender<Message>, msg: &StoreMessage) {
    match codec::encode(msg) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode store message");
        }
    }
}

/// Starts the store server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the store server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
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
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
