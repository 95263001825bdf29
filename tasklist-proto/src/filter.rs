//! Row filters and ordering for store queries.
//!
//! Filters are conjunctions: a row matches when every condition that is set
//! holds. Every filter the client builds pins `owner IS NULL`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

/// Condition on the `owner` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OwnerFilter {
    /// No condition.
    #[default]
    Any,
    /// `owner IS NULL`.
    IsNull,
}

/// Conjunction of column conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowFilter {
    /// `id = ?` when set.
    pub id: Option<TaskId>,
    /// Condition on `owner`.
    pub owner: OwnerFilter,
}

impl RowFilter {
    /// All public rows: `owner IS NULL`.
    #[must_use]
    pub const fn public() -> Self {
        Self {
            id: None,
            owner: OwnerFilter::IsNull,
        }
    }

    /// A single public row: `id = ? AND owner IS NULL`.
    #[must_use]
    pub const fn public_row(id: TaskId) -> Self {
        Self {
            id: Some(id),
            owner: OwnerFilter::IsNull,
        }
    }

    /// Whether `task` satisfies every condition.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(id) = self.id
            && task.id != id
        {
            return false;
        }
        match self.owner {
            OwnerFilter::Any => true,
            OwnerFilter::IsNull => task.owner.is_none(),
        }
    }
}

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    /// By priority rank.
    Priority,
    /// By creation time.
    CreatedAt,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column to sort on.
    pub key: SortKey,
    /// Ascending when `true`.
    pub ascending: bool,
}

impl OrderBy {
    /// Descending order on `key`.
    #[must_use]
    pub const fn desc(key: SortKey) -> Self {
        Self {
            key,
            ascending: false,
        }
    }

    /// Ascending order on `key`.
    #[must_use]
    pub const fn asc(key: SortKey) -> Self {
        Self {
            key,
            ascending: true,
        }
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let ord = match self.key {
            SortKey::Priority => a.priority.rank().cmp(&b.priority.rank()),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        if self.ascending { ord } else { ord.reverse() }
    }
}

/// A `SELECT *` with a filter and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Rows to include.
    pub filter: RowFilter,
    /// Sort terms, applied in sequence.
    pub order: Vec<OrderBy>,
}

impl Query {
    /// The list query: public rows, priority desc, then `created_at` desc.
    #[must_use]
    pub fn public_tasks() -> Self {
        Self {
            filter: RowFilter::public(),
            order: vec![
                OrderBy::desc(SortKey::Priority),
                OrderBy::desc(SortKey::CreatedAt),
            ],
        }
    }

    /// Compares two rows under this query's ordering.
    #[must_use]
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        self.order
            .iter()
            .map(|o| o.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Filters and sorts `rows`.
    pub fn run<'a>(&self, rows: impl IntoIterator<Item = &'a Task>) -> Vec<Task> {
        let mut out: Vec<Task> = rows
            .into_iter()
            .filter(|t| self.filter.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| self.compare(a, b));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Category, NewTask, OwnerId, Priority, Timestamp, display_order};

    fn row(priority: Priority, created_at: u64, owner: Option<&str>) -> Task {
        let mut new = NewTask::public("t", Category::Other, priority);
        new.owner = owner.map(OwnerId::new);
        new.into_task(TaskId::new(), Timestamp::from_millis(created_at))
    }

    #[test]
    fn public_filter_excludes_owned_rows() {
        let f = RowFilter::public();
        assert!(f.matches(&row(Priority::Low, 1, None)));
        assert!(!f.matches(&row(Priority::Low, 1, Some("alice"))));
    }

    #[test]
    fn public_row_filter_needs_id_and_null_owner() {
        let public = row(Priority::Low, 1, None);
        let mut owned = public.clone();
        owned.owner = Some(OwnerId::new("bob"));

        let f = RowFilter::public_row(public.id);
        assert!(f.matches(&public));
        assert!(!f.matches(&owned));
        assert!(!f.matches(&row(Priority::Low, 1, None)));
    }

    #[test]
    fn default_filter_matches_everything() {
        assert!(RowFilter::default().matches(&row(Priority::High, 1, Some("x"))));
    }

    #[test]
    fn public_tasks_query_agrees_with_display_order() {
        let q = Query::public_tasks();
        let rows = [
            row(Priority::Low, 3, None),
            row(Priority::High, 1, None),
            row(Priority::High, 2, None),
            row(Priority::Medium, 9, None),
        ];
        for a in &rows {
            for b in &rows {
                assert_eq!(q.compare(a, b), display_order(a, b));
            }
        }
    }

    #[test]
    fn run_filters_then_sorts() {
        let q = Query {
            filter: RowFilter::public(),
            order: vec![OrderBy::asc(SortKey::CreatedAt)],
        };
        let rows = vec![
            row(Priority::Low, 30, None),
            row(Priority::Low, 10, Some("carol")),
            row(Priority::Low, 20, None),
        ];
        let out = q.run(&rows);
        let times: Vec<u64> = out.iter().map(|t| t.created_at.as_millis()).collect();
        assert_eq!(times, vec![20, 30]);
    }
}
