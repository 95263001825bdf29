//! Task list state: the local mirror of the public task set, input drafts,
//! and the notices shown to the user.
//!
//! [`state::TaskList`] is a plain state machine with no I/O. The async
//! driver in [`crate::controller`] performs the store calls it asks for and
//! feeds the outcomes back.

pub mod state;

use std::fmt;

use tasklist_proto::task::{Category, Priority};

use crate::remote::RemoteError;

/// Prompt shown before a task is deleted.
pub const DELETE_PROMPT: &str = "Are you sure you want to delete this task?";

/// Errors from local validation. These never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The title is empty after trimming whitespace.
    #[error("Please enter a task title")]
    TitleEmpty,
}

/// The operation a notice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Fetching the list.
    Loading,
    /// Inserting a task.
    Adding,
    /// Toggling completion.
    Updating,
    /// Deleting a task.
    Deleting,
    /// Opening the change feed.
    Subscribing,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading tasks"),
            Self::Adding => write!(f, "adding task"),
            Self::Updating => write!(f, "updating task"),
            Self::Deleting => write!(f, "deleting task"),
            Self::Subscribing => write!(f, "subscribing to task changes"),
        }
    }
}

/// A user-visible message about something that went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Input was rejected locally.
    Validation(TaskError),
    /// The store reported a failure; `detail` is its message.
    Failure {
        /// What was being attempted.
        verb: Verb,
        /// Store-provided description.
        detail: String,
    },
    /// Something outside the store contract went wrong.
    Unexpected {
        /// What was being attempted.
        verb: Verb,
    },
}

impl Notice {
    /// Builds the notice for a failed store call.
    #[must_use]
    pub fn from_remote(verb: Verb, err: &RemoteError) -> Self {
        if err.is_unexpected() {
            Self::Unexpected { verb }
        } else {
            Self::Failure {
                verb,
                detail: err.to_string(),
            }
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::Failure { verb, detail } => write!(f, "Error {verb}: {detail}"),
            Self::Unexpected { verb } => write!(f, "Unexpected error {verb}"),
        }
    }
}

/// The new-task form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drafts {
    /// Title as typed.
    pub title: String,
    /// Selected category.
    pub category: Category,
    /// Selected priority.
    pub priority: Priority,
}

impl Default for Drafts {
    fn default() -> Self {
        Self {
            title: String::new(),
            category: Category::Personal,
            priority: Priority::Medium,
        }
    }
}
