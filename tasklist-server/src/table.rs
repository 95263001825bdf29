//! In-memory `tasks` table.
//!
//! The [`TaskTable`] owns every row the store serves, public and owned
//! alike. It assigns ids and creation times on insert and applies filtered
//! updates and deletes. Notification fan-out lives in [`crate::server`].

use std::collections::HashMap;

use tasklist_proto::filter::{Query, RowFilter};
use tasklist_proto::store::StoreError;
use tasklist_proto::task::{NewTask, Task, TaskId, TaskPatch, Timestamp};
use tokio::sync::RwLock;

#[derive(Default)]
struct Rows {
    by_id: HashMap<TaskId, Task>,
    /// Last `created_at` handed out, in ms. Keeps stamps strictly increasing.
    last_stamp: u64,
}

/// Thread-safe task table.
///
/// Guarded by a [`RwLock`]; reads run concurrently, writes are serialized.
#[derive(Default)]
pub struct TaskTable {
    rows: RwLock<Rows>,
}

impl TaskTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows matching `query.filter` in `query.order`.
    pub async fn select(&self, query: &Query) -> Vec<Task> {
        let rows = self.rows.read().await;
        query.run(rows.by_id.values())
    }

    /// Inserts a row, assigning its id and creation time.
    ///
    /// The client's `created_at` placeholder is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] if the title is blank.
    pub async fn insert(&self, row: NewTask) -> Result<Task, StoreError> {
        if row.title.trim().is_empty() {
            return Err(StoreError::Rejected("title must not be blank".to_string()));
        }
        let mut rows = self.rows.write().await;
        let stamp = Timestamp::now().as_millis().max(rows.last_stamp + 1);
        rows.last_stamp = stamp;
        let task = row.into_task(TaskId::new(), Timestamp::from_millis(stamp));
        rows.by_id.insert(task.id, task.clone());
        drop(rows);
        Ok(task)
    }

    /// Applies `patch` to every row matching `filter`.
    ///
    /// Returns the updated rows; an empty `Vec` means the filter matched
    /// nothing, which is not an error.
    pub async fn update(&self, filter: &RowFilter, patch: TaskPatch) -> Vec<Task> {
        let mut rows = self.rows.write().await;
        rows.by_id
            .values_mut()
            .filter(|t| filter.matches(t))
            .map(|t| {
                patch.apply(t);
                t.clone()
            })
            .collect()
    }

    /// Removes every row matching `filter`, returning the removed rows.
    pub async fn delete(&self, filter: &RowFilter) -> Vec<Task> {
        let mut rows = self.rows.write().await;
        let doomed: Vec<TaskId> = rows
            .by_id
            .values()
            .filter(|t| filter.matches(t))
            .map(|t| t.id)
            .collect();
        doomed
            .iter()
            .filter_map(|id| rows.by_id.remove(id))
            .collect()
    }

    /// Number of rows currently stored.
    pub async fn len(&self) -> usize {
        self.rows.read().await.by_id.len()
    }

    /// Whether the table holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
