//! Store wire protocol between clients and the task store server.
//!
//! Each [`StoreMessage`] is postcard-encoded (see [`crate::codec`]) and sent
//! as one WebSocket binary frame. Clients tag every request with a
//! [`RequestId`] of their choosing; the server echoes it on the matching
//! response. Change notifications arrive unsolicited on the same socket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::{Query, RowFilter};
use crate::task::{NewTask, Task, TaskId, TaskPatch};

/// Name of the only table the store serves.
pub const TASKS_TABLE: &str = "tasks";

/// Largest encoded frame the store accepts, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Client-chosen correlation id for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Server-assigned identifier of a change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a fresh subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations a client can ask the store to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOp {
    /// Read rows.
    Select(Query),
    /// Append one row. The store assigns `id` and `created_at`.
    Insert {
        /// Row payload.
        row: NewTask,
        /// Reply with the stored row instead of a count.
        returning: bool,
    },
    /// Patch every row matching `filter`.
    Update {
        /// Rows to patch.
        filter: RowFilter,
        /// Fields to write.
        patch: TaskPatch,
    },
    /// Remove every row matching `filter`.
    Delete {
        /// Rows to remove.
        filter: RowFilter,
    },
    /// Open a change feed for rows matching `filter`.
    Subscribe {
        /// Client label for the feed, echoed in server logs.
        channel: String,
        /// Rows to watch.
        filter: RowFilter,
    },
    /// Close a change feed.
    Unsubscribe {
        /// The feed to close.
        subscription: SubscriptionId,
    },
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreReply {
    /// Rows from `Select`, or the inserted row for a returning `Insert`.
    Rows(Vec<Task>),
    /// Number of rows written or removed.
    Affected(u64),
    /// A feed was opened.
    Subscribed(SubscriptionId),
    /// A feed was closed (or was already gone).
    Unsubscribed,
}

/// Store-side failures carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    /// The store refused the operation (e.g. a blank title).
    #[error("rejected: {0}")]
    Rejected(String),
    /// The frame exceeded the server's size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A change notification. Carries identity only, not the row contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change.
    pub kind: ChangeKind,
    /// Table the row lives in.
    pub table: String,
    /// Row that changed.
    pub task_id: TaskId,
}

/// Every frame exchanged between a store client and the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMessage {
    /// Client request.
    Request {
        /// Correlation id, echoed on the response.
        id: RequestId,
        /// The operation.
        op: StoreOp,
    },
    /// Server response to a request.
    Response {
        /// Correlation id of the request.
        id: RequestId,
        /// Outcome.
        result: Result<StoreReply, StoreError>,
    },
    /// Unsolicited change notification for an open feed.
    Change {
        /// Feed the change belongs to.
        subscription: SubscriptionId,
        /// What changed.
        event: ChangeEvent,
    },
    /// Connection-level error not tied to a request (e.g. undecodable frame).
    Error {
        /// Human-readable description.
        reason: String,
    },
}
