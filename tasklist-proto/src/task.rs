//! Task row types shared by the store server and the client.
//!
//! A [`Task`] is a durable row as the store returns it. A [`NewTask`] is the
//! payload a client sends on insert; the same shape is what the client shows
//! as a provisional row while the insert is in flight.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned unique identifier for a task, based on UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID as a task identifier.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the owner of a private task.
///
/// Public tasks carry no owner. The client never reads or writes owned rows;
/// the type exists so the store can hold them and filter them out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner identifier from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Fixed set of task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    /// Personal errands.
    #[default]
    Personal,
    /// Work items.
    Work,
    /// Anything else.
    Other,
}

impl Category {
    /// All categories in selector order.
    pub const ALL: [Self; 3] = [Self::Personal, Self::Work, Self::Other];

    /// Returns the next category in selector order, wrapping around.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Personal => Self::Work,
            Self::Work => Self::Other,
            Self::Other => Self::Personal,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal => write!(f, "Personal"),
            Self::Work => write!(f, "Work"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// Task priority. Drives list order and row colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Lowest rank.
    Low,
    /// Default for new tasks.
    #[default]
    Medium,
    /// Highest rank, listed first.
    High,
}

impl Priority {
    /// All priorities in selector order.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Sort rank: high > medium > low.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    /// Returns the next priority in selector order, wrapping around.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A durable task row as stored and returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier, stable for the lifetime of the row.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Task category.
    pub category: Category,
    /// Task priority.
    pub priority: Priority,
    /// Whether the task is done.
    pub completed: bool,
    /// Owner of the row; `None` for public tasks.
    pub owner: Option<OwnerId>,
    /// Assigned by the store on insert.
    pub created_at: Timestamp,
}

impl Task {
    /// Whether this is a public (owner-unset) task.
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.owner.is_none()
    }
}

/// Insert payload for a new row, without an id.
///
/// `created_at` is a client-side placeholder; the store replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Task category.
    pub category: Category,
    /// Task priority.
    pub priority: Priority,
    /// Always `false` for rows created by the client.
    pub completed: bool,
    /// Owner of the row; `None` for public tasks.
    pub owner: Option<OwnerId>,
    /// Placeholder creation time.
    pub created_at: Timestamp,
}

impl NewTask {
    /// Builds a public, not-yet-completed row stamped with the local clock.
    pub fn public(title: impl Into<String>, category: Category, priority: Priority) -> Self {
        Self {
            title: title.into(),
            category,
            priority,
            completed: false,
            owner: None,
            created_at: Timestamp::now(),
        }
    }

    /// Turns the payload into a durable row with the given identity.
    #[must_use]
    pub fn into_task(self, id: TaskId, created_at: Timestamp) -> Task {
        Task {
            id,
            title: self.title,
            category: self.category,
            priority: self.priority,
            completed: self.completed,
            owner: self.owner,
            created_at,
        }
    }
}

/// A partial update. Only `Some` fields are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New completion flag.
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// A patch that sets the completion flag.
    #[must_use]
    pub const fn completed(value: bool) -> Self {
        Self {
            completed: Some(value),
        }
    }

    /// Writes the patch into a row.
    pub fn apply(&self, task: &mut Task) {
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

/// Display order: priority rank descending, then newest first.
#[must_use]
pub fn display_order(a: &Task, b: &Task) -> Ordering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Sorts rows in place into display order.
pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by(display_order);
}
