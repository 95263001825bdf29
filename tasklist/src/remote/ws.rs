//! WebSocket client for the hosted task store.
//!
//! Implements [`RemoteStore`] over one WebSocket connection to
//! `tasklist-server`. Requests are tagged with a [`RequestId`] and parked in
//! a pending map until the background reader sees the matching response.
//! Change notifications are routed to the feed they belong to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tasklist_proto::codec;
use tasklist_proto::filter::{Query, RowFilter};
use tasklist_proto::store::{
    ChangeEvent, RequestId, StoreError, StoreMessage, StoreOp, StoreReply, SubscriptionId,
};
use tasklist_proto::task::{NewTask, Task, TaskPatch};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{RemoteError, RemoteStore, StoreMode, Subscription};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of each change feed channel.
pub const DEFAULT_FEED_BUFFER: usize = 64;

/// Connection options for [`WsStore::connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Bound on the WebSocket handshake. Requests themselves never time out.
    pub connect_timeout: Duration,
    /// Capacity of each feed channel. When a feed is full, further events
    /// are dropped until the consumer catches up.
    pub feed_buffer: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

/// Who is waiting on a request.
enum Waiter {
    /// A plain request; gets the raw reply.
    Reply(oneshot::Sender<Result<StoreReply, StoreError>>),
    /// A subscribe request; the reader opens the feed before handing it over
    /// so no change for it can be missed.
    Subscribe(oneshot::Sender<Result<Subscription, StoreError>>),
}

/// State shared between the store handle and its reader task.
struct Shared {
    pending: Mutex<HashMap<RequestId, Waiter>>,
    feeds: Mutex<HashMap<SubscriptionId, mpsc::Sender<ChangeEvent>>>,
    connected: AtomicBool,
    feed_buffer: usize,
}

/// WebSocket-backed [`RemoteStore`].
///
/// Created via [`WsStore::connect`], which opens the connection and spawns
/// a writer task and a reader task.
pub struct WsStore {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    reader_handle: tokio::task::JoinHandle<()>,
    /// Ends on its own once `outgoing` is dropped and the queue is drained.
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl WsStore {
    /// Connect to a task store.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::InvalidUrl`] if `url` is not a `ws://` or `wss://` URL.
    /// - [`RemoteError::Timeout`] if the handshake exceeds the connect timeout.
    /// - [`RemoteError::Unreachable`] if nothing is listening at `url`.
    /// - [`RemoteError::Io`] for TLS, HTTP, and other connection failures.
    pub async fn connect(url: &str, options: ConnectOptions) -> Result<Self, RemoteError> {
        validate_url(url)?;

        let (ws_stream, _response) =
            tokio::time::timeout(options.connect_timeout, connect_async(url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = url, "store WebSocket connect timed out");
                    RemoteError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = url, err = %e, "store WebSocket connect failed");
                    map_ws_connect_error(url, e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            feed_buffer: options.feed_buffer.max(1),
        });

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let writer_handle = tokio::spawn(writer_loop(ws_sender, outgoing_rx, Arc::clone(&shared)));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, Arc::clone(&shared)));

        tracing::info!(url = url, "connected to task store");

        Ok(Self {
            url: url.to_string(),
            outgoing,
            shared,
            next_request: AtomicU64::new(1),
            reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// The store URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a request frame for the writer task.
    fn send_frame(&self, id: RequestId, op: StoreOp) -> Result<(), RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionClosed);
        }
        let bytes = codec::encode(&StoreMessage::Request { id, op })
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        self.outgoing
            .send(Message::Binary(bytes.into()))
            .map_err(|_| RemoteError::ConnectionClosed)
    }

    /// Send one request and wait for its reply.
    async fn request(&self, op: StoreOp) -> Result<StoreReply, RemoteError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, Waiter::Reply(tx));
        if let Err(e) = self.send_frame(id, op) {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }
        // The reader drops every waiter when the connection goes away.
        let result = rx.await.map_err(|_| RemoteError::ConnectionClosed)?;
        Ok(result?)
    }
}

impl RemoteStore for WsStore {
    async fn select(&self, query: Query) -> Result<Vec<Task>, RemoteError> {
        match self.request(StoreOp::Select(query)).await? {
            StoreReply::Rows(rows) => Ok(rows),
            other => Err(unexpected_reply("select", &other)),
        }
    }

    async fn insert(&self, row: NewTask) -> Result<Task, RemoteError> {
        let op = StoreOp::Insert {
            row,
            returning: true,
        };
        match self.request(op).await? {
            StoreReply::Rows(rows) if rows.len() == 1 => {
                rows.into_iter().next().ok_or_else(|| {
                    RemoteError::Protocol("insert returned no row".to_string())
                })
            }
            other => Err(unexpected_reply("insert", &other)),
        }
    }

    async fn update(&self, filter: RowFilter, patch: TaskPatch) -> Result<u64, RemoteError> {
        match self.request(StoreOp::Update { filter, patch }).await? {
            StoreReply::Affected(n) => Ok(n),
            other => Err(unexpected_reply("update", &other)),
        }
    }

    async fn delete(&self, filter: RowFilter) -> Result<u64, RemoteError> {
        match self.request(StoreOp::Delete { filter }).await? {
            StoreReply::Affected(n) => Ok(n),
            other => Err(unexpected_reply("delete", &other)),
        }
    }

    async fn subscribe(&self, channel: &str, filter: RowFilter) -> Result<Subscription, RemoteError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, Waiter::Subscribe(tx));
        let op = StoreOp::Subscribe {
            channel: channel.to_string(),
            filter,
        };
        if let Err(e) = self.send_frame(id, op) {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }
        let sub = rx.await.map_err(|_| RemoteError::ConnectionClosed)??;
        tracing::info!(subscription = %sub.id, channel = channel, "subscribed to change feed");
        Ok(sub)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.shared.feeds.lock().remove(&id).is_none() {
            return;
        }
        tracing::info!(subscription = %id, "closing change feed");
        // Fire and forget: the reply is ignored by the reader.
        let request = self.next_id();
        if let Err(e) = self.send_frame(request, StoreOp::Unsubscribe { subscription: id }) {
            tracing::debug!(subscription = %id, err = %e, "unsubscribe not sent");
        }
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Remote
    }
}

impl Drop for WsStore {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

fn unexpected_reply(op: &str, reply: &StoreReply) -> RemoteError {
    tracing::warn!(op = op, reply = ?reply, "unexpected store reply");
    RemoteError::Protocol(format!("unexpected reply to {op}"))
}

/// Drains the outgoing queue into the socket.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
) {
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = ws_sender.send(msg).await {
            tracing::warn!(err = %e, "store send failed");
            shared.connected.store(false, Ordering::Relaxed);
            break;
        }
    }
    let _ = ws_sender.close().await;
}

/// Reads frames, resolves waiters, and routes change notifications.
///
/// Malformed frames are logged and skipped. When the socket closes every
/// waiter is dropped (its caller sees `ConnectionClosed`) and every feed
/// ends.
async fn reader_loop(mut ws_reader: WsReader, shared: Arc<Shared>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode(&data) {
                Ok(msg) => dispatch(&shared, msg),
                Err(e) => {
                    tracing::warn!(err = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text/raw frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "store WebSocket read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    shared.pending.lock().clear();
    shared.feeds.lock().clear();
    tracing::info!("store reader task exiting");
}

fn dispatch(shared: &Shared, msg: StoreMessage) {
    match msg {
        StoreMessage::Response { id, result } => {
            let Some(waiter) = shared.pending.lock().remove(&id) else {
                tracing::debug!(request = %id, "response with no waiter");
                return;
            };
            match waiter {
                Waiter::Reply(tx) => {
                    let _ = tx.send(result);
                }
                Waiter::Subscribe(tx) => {
                    let outcome = match result {
                        Ok(StoreReply::Subscribed(sub_id)) => {
                            let (feed_tx, events) = mpsc::channel(shared.feed_buffer);
                            shared.feeds.lock().insert(sub_id, feed_tx);
                            Ok(Subscription { id: sub_id, events })
                        }
                        Ok(other) => {
                            tracing::warn!(reply = ?other, "unexpected reply to subscribe");
                            Err(StoreError::Rejected("unexpected reply to subscribe".to_string()))
                        }
                        Err(e) => Err(e),
                    };
                    if let Err(Ok(sub)) = tx.send(outcome) {
                        // Caller went away before the feed was handed over.
                        shared.feeds.lock().remove(&sub.id);
                    }
                }
            }
        }
        StoreMessage::Change {
            subscription,
            event,
        } => {
            let mut feeds = shared.feeds.lock();
            let Some(feed) = feeds.get(&subscription) else {
                tracing::debug!(subscription = %subscription, "change for closed feed");
                return;
            };
            match feed.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tracing::debug!(
                        subscription = %subscription,
                        task_id = %event.task_id,
                        "feed full, dropping change"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    feeds.remove(&subscription);
                }
            }
        }
        StoreMessage::Error { reason } => {
            tracing::warn!(reason = %reason, "store error");
        }
        StoreMessage::Request { id, .. } => {
            tracing::debug!(request = %id, "ignoring request frame from store");
        }
    }
}

fn validate_url(url: &str) -> Result<(), RemoteError> {
    let parsed = url::Url::parse(url).map_err(|e| RemoteError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(RemoteError::InvalidUrl(format!(
            "{url}: unsupported scheme {other}"
        ))),
    }
}

/// Map a `tokio_tungstenite` connection error to a [`RemoteError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> RemoteError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                RemoteError::Unreachable(url.to_string())
            } else {
                RemoteError::Io(io_err)
            }
        }
        WsError::Tls(_) => RemoteError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => RemoteError::Io(std::io::Error::other(format!(
            "store HTTP error: status {}",
            response.status()
        ))),
        WsError::Url(e) => RemoteError::InvalidUrl(format!("{url}: {e}")),
        other => RemoteError::Io(std::io::Error::other(format!(
            "store connection error: {other}"
        ))),
    }
}
