//! Remote store abstraction.
//!
//! Defines the [`RemoteStore`] trait the controller talks to. Concrete
//! implementations:
//! - [`ws::WsStore`]: WebSocket client for `tasklist-server`
//! - [`memory::MemoryStore`]: in-process table for local mode and tests

pub mod memory;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use tasklist_proto::filter::{Query, RowFilter};
use tasklist_proto::store::{ChangeEvent, StoreError, SubscriptionId};
use tasklist_proto::task::{NewTask, Task, TaskPatch};
use tokio::sync::mpsc;

/// Which kind of store backs the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Hosted store over WebSocket.
    Remote,
    /// In-process table; nothing leaves this process.
    Local,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "Remote"),
            Self::Local => write!(f, "Local"),
        }
    }
}

/// Errors that can occur talking to the store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The connection to the store has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting to the store timed out.
    #[error("store connection timed out")]
    Timeout,

    /// The store could not be reached.
    #[error("store at {0} is unreachable")]
    Unreachable(String),

    /// The store refused the operation.
    #[error("{0}")]
    Rejected(String),

    /// An underlying I/O error occurred.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured store URL is not a usable WebSocket URL.
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),

    /// The store answered with something that makes no sense for the request.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether this failure is outside the store contract.
    ///
    /// Unexpected failures get a generic notice instead of their detail.
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl From<StoreError> for RemoteError {
    fn from(err: StoreError) -> Self {
        Self::Rejected(err.to_string())
    }
}

/// An open change feed.
///
/// `events` yields one [`ChangeEvent`] per changed row and ends when the
/// feed is closed or the connection drops.
#[derive(Debug)]
pub struct Subscription {
    /// Store-assigned feed id, needed to unsubscribe.
    pub id: SubscriptionId,
    /// Change notifications.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Async client for the hosted `tasks` table.
///
/// Every method maps onto one store operation. Filters are applied by the
/// store; callers that must never see owned rows pass an owner-is-null
/// filter themselves.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the rows matching `query.filter`, in `query.order`.
    fn select(
        &self,
        query: Query,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Insert one row and return it as stored, with `id` and `created_at`
    /// assigned by the store.
    fn insert(
        &self,
        row: NewTask,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send;

    /// Patch every row matching `filter`. Returns the affected row count;
    /// zero is not an error.
    fn update(
        &self,
        filter: RowFilter,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<u64, RemoteError>> + Send;

    /// Remove every row matching `filter`. Returns the affected row count;
    /// zero is not an error.
    fn delete(
        &self,
        filter: RowFilter,
    ) -> impl std::future::Future<Output = Result<u64, RemoteError>> + Send;

    /// Open a change feed for rows matching `filter`.
    fn subscribe(
        &self,
        channel: &str,
        filter: RowFilter,
    ) -> impl std::future::Future<Output = Result<Subscription, RemoteError>> + Send;

    /// Close a change feed. Closing an unknown or already closed feed is a
    /// no-op.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Which kind of store this is.
    fn mode(&self) -> StoreMode;
}

/// A shared store is a store. Lets several controllers, or a controller and
/// a test, use one backing table.
impl<T: RemoteStore> RemoteStore for Arc<T> {
    fn select(
        &self,
        query: Query,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RemoteError>> + Send {
        (**self).select(query)
    }

    fn insert(
        &self,
        row: NewTask,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send {
        (**self).insert(row)
    }

    fn update(
        &self,
        filter: RowFilter,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<u64, RemoteError>> + Send {
        (**self).update(filter, patch)
    }

    fn delete(
        &self,
        filter: RowFilter,
    ) -> impl std::future::Future<Output = Result<u64, RemoteError>> + Send {
        (**self).delete(filter)
    }

    fn subscribe(
        &self,
        channel: &str,
        filter: RowFilter,
    ) -> impl std::future::Future<Output = Result<Subscription, RemoteError>> + Send {
        (**self).subscribe(channel, filter)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        (**self).unsubscribe(id);
    }

    fn mode(&self) -> StoreMode {
        (**self).mode()
    }
}
