//! The task list state machine.
//!
//! Every user or store event is a method on [`TaskList`]. Methods that start
//! a store operation apply the optimistic change, record what is needed to
//! undo it under a fresh [`OpId`], and return the request to send. The
//! matching `finish_*` method takes the outcome and either confirms or rolls
//! back. Rollback state is keyed by invocation, never by task id, so two
//! operations on the same task never share a snapshot.

use std::collections::HashMap;
use std::fmt;

use tasklist_proto::filter::RowFilter;
use tasklist_proto::task::{Category, NewTask, Priority, Task, TaskId, TaskPatch, sort_for_display};

use super::{Drafts, Notice, TaskError, Verb};
use crate::remote::RemoteError;

/// Identity of one operation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// One row of the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Shown while its insert is in flight. Has no id yet.
    Provisional {
        /// The insert that will replace this row.
        op: OpId,
        /// What was submitted.
        row: NewTask,
    },
    /// A row the store has confirmed.
    Durable(Task),
}

impl Entry {
    /// Store id, once assigned.
    #[must_use]
    pub const fn id(&self) -> Option<TaskId> {
        match self {
            Self::Provisional { .. } => None,
            Self::Durable(t) => Some(t.id),
        }
    }

    /// Task title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Provisional { row, .. } => &row.title,
            Self::Durable(t) => &t.title,
        }
    }

    /// Task category.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Provisional { row, .. } => row.category,
            Self::Durable(t) => t.category,
        }
    }

    /// Task priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self {
            Self::Provisional { row, .. } => row.priority,
            Self::Durable(t) => t.priority,
        }
    }

    /// Completion flag.
    #[must_use]
    pub const fn completed(&self) -> bool {
        match self {
            Self::Provisional { row, .. } => row.completed,
            Self::Durable(t) => t.completed,
        }
    }

    /// Whether the row is still waiting for its insert.
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional { .. })
    }
}

/// Undo information for an outstanding operation.
#[derive(Debug)]
enum Pending {
    Create { submitted: Drafts },
    Toggle { id: TaskId, previous: bool },
    Remove { snapshot: Option<(usize, Task)> },
}

/// A request to patch one public row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Operation to finish with [`TaskList::finish_toggle`].
    pub op: OpId,
    /// `id = ? AND owner IS NULL`.
    pub filter: RowFilter,
    /// New completion flag.
    pub patch: TaskPatch,
}

/// A request to delete one public row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    /// Operation to finish with [`TaskList::finish_remove`].
    pub op: OpId,
    /// `id = ? AND owner IS NULL`.
    pub filter: RowFilter,
}

/// The mirror, drafts, busy flag, and outstanding operations.
#[derive(Debug, Default)]
pub struct TaskList {
    entries: Vec<Entry>,
    drafts: Drafts,
    loading: bool,
    reload_pending: bool,
    pending: HashMap<OpId, Pending>,
    notice: Option<Notice>,
    next_op: u64,
}

impl TaskList {
    /// Creates an empty list with default drafts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows in display order, provisional ones first.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Looks up a confirmed row by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.entries.iter().find_map(|e| match e {
            Entry::Durable(t) if t.id == id => Some(t),
            _ => None,
        })
    }

    /// The new-task form.
    #[must_use]
    pub const fn drafts(&self) -> &Drafts {
        &self.drafts
    }

    /// Mutable access to the new-task form.
    pub const fn drafts_mut(&mut self) -> &mut Drafts {
        &mut self.drafts
    }

    /// Whether a load is outstanding.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Number of inserts, updates and deletes still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// The latest notice, if any.
    #[must_use]
    pub const fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Dismisses the current notice.
    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    fn next_op(&mut self) -> OpId {
        self.next_op += 1;
        OpId(self.next_op)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == Some(id))
    }

    /// Asks to fetch the list.
    ///
    /// Returns `true` if the caller should fetch now. While a fetch is
    /// outstanding the request is folded into one follow-up fetch and
    /// `false` is returned.
    pub fn begin_load(&mut self) -> bool {
        if self.loading {
            self.reload_pending = true;
            return false;
        }
        self.loading = true;
        true
    }

    /// Applies a fetch result.
    ///
    /// On success the confirmed rows are replaced by `rows` (owned rows
    /// dropped, display order enforced); provisional rows stay at the head.
    /// On failure the mirror is left alone and a notice is raised.
    ///
    /// Returns `true` if a follow-up fetch was requested meanwhile; the list
    /// then stays loading and the caller should fetch again.
    pub fn finish_load(&mut self, result: Result<Vec<Task>, &RemoteError>) -> bool {
        match result {
            Ok(mut rows) => {
                rows.retain(Task::is_public);
                sort_for_display(&mut rows);
                self.entries.retain(Entry::is_provisional);
                self.entries.extend(rows.into_iter().map(Entry::Durable));
            }
            Err(err) => {
                self.notice = Some(Notice::from_remote(Verb::Loading, err));
            }
        }
        if self.reload_pending {
            self.reload_pending = false;
            true
        } else {
            self.loading = false;
            false
        }
    }

    /// Starts creating a task.
    ///
    /// The title is trimmed. On success a provisional row is placed at the
    /// head of the mirror, the drafts are reset, and the insert payload is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TitleEmpty`] if the trimmed title is empty. The
    /// mirror and drafts are untouched.
    pub fn create(
        &mut self,
        title: &str,
        category: Category,
        priority: Priority,
    ) -> Result<(OpId, NewTask), TaskError> {
        let title = title.trim();
        if title.is_empty() {
            self.notice = Some(Notice::Validation(TaskError::TitleEmpty));
            return Err(TaskError::TitleEmpty);
        }

        let op = self.next_op();
        let row = NewTask::public(title, category, priority);
        self.entries.insert(
            0,
            Entry::Provisional {
                op,
                row: row.clone(),
            },
        );
        self.pending.insert(
            op,
            Pending::Create {
                submitted: Drafts {
                    title: title.to_string(),
                    category,
                    priority,
                },
            },
        );
        self.drafts = Drafts::default();
        Ok((op, row))
    }

    /// [`create`](Self::create) with the current drafts.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TitleEmpty`] if the drafted title is blank.
    pub fn submit(&mut self) -> Result<(OpId, NewTask), TaskError> {
        let Drafts {
            title,
            category,
            priority,
        } = self.drafts.clone();
        self.create(&title, category, priority)
    }

    /// Applies an insert result.
    ///
    /// Success swaps the provisional row for the stored one, or drops it if
    /// a reload already brought that id in. Failure removes the provisional
    /// row and puts the submitted values back into the drafts.
    pub fn finish_create(&mut self, op: OpId, result: Result<Task, &RemoteError>) {
        let Some(Pending::Create { submitted }) = self.pending.remove(&op) else {
            return;
        };
        let slot = self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Provisional { op: o, .. } if *o == op));

        match result {
            Ok(task) => {
                let already_loaded = self.position(task.id).is_some();
                match slot {
                    Some(i) if already_loaded || !task.is_public() => {
                        self.entries.remove(i);
                    }
                    Some(i) => self.entries[i] = Entry::Durable(task),
                    None => {}
                }
            }
            Err(err) => {
                if let Some(i) = slot {
                    self.entries.remove(i);
                }
                self.drafts = submitted;
                self.notice = Some(Notice::from_remote(Verb::Adding, err));
            }
        }
    }

    /// Starts flipping a task's completion flag from `current`.
    ///
    /// The local flag changes immediately.
    pub fn toggle(&mut self, id: TaskId, current: bool) -> UpdateRequest {
        let op = self.next_op();
        if let Some(i) = self.position(id)
            && let Entry::Durable(t) = &mut self.entries[i]
        {
            t.completed = !current;
        }
        self.pending.insert(
            op,
            Pending::Toggle {
                id,
                previous: current,
            },
        );
        UpdateRequest {
            op,
            filter: RowFilter::public_row(id),
            patch: TaskPatch::completed(!current),
        }
    }

    /// Applies an update result. Failure reverts the flag. Zero affected rows
    /// counts as success.
    pub fn finish_toggle(&mut self, op: OpId, result: Result<u64, &RemoteError>) {
        let Some(Pending::Toggle { id, previous }) = self.pending.remove(&op) else {
            return;
        };
        if let Err(err) = result {
            if let Some(i) = self.position(id)
                && let Entry::Durable(t) = &mut self.entries[i]
            {
                t.completed = previous;
            }
            self.notice = Some(Notice::from_remote(Verb::Updating, err));
        }
    }

    /// Starts deleting a task. The row leaves the mirror immediately; a
    /// snapshot of it and its position is kept for rollback.
    pub fn remove(&mut self, id: TaskId) -> DeleteRequest {
        let op = self.next_op();
        let snapshot = self.position(id).and_then(|i| match self.entries.remove(i) {
            Entry::Durable(t) => Some((i, t)),
            Entry::Provisional { .. } => None,
        });
        self.pending.insert(op, Pending::Remove { snapshot });
        DeleteRequest {
            op,
            filter: RowFilter::public_row(id),
        }
    }

    /// Applies a delete result. Failure restores the snapshot at its former
    /// position unless a reload already brought the row back. Zero affected
    /// rows counts as success.
    pub fn finish_remove(&mut self, op: OpId, result: Result<u64, &RemoteError>) {
        let Some(Pending::Remove { snapshot }) = self.pending.remove(&op) else {
            return;
        };
        if let Err(err) = result {
            if let Some((index, task)) = snapshot
                && self.position(task.id).is_none()
            {
                let index = index.min(self.entries.len());
                self.entries.insert(index, Entry::Durable(task));
            }
            self.notice = Some(Notice::from_remote(Verb::Deleting, err));
        }
    }

    /// Records a failure to open the change feed.
    pub fn subscribe_failed(&mut self, err: &RemoteError) {
        self.notice = Some(Notice::from_remote(Verb::Subscribing, err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklist_proto::task::{OwnerId, Timestamp};

    fn stored(title: &str, priority: Priority, created_at: u64) -> Task {
        NewTask::public(title, Category::Work, priority)
            .into_task(TaskId::new(), Timestamp::from_millis(created_at))
    }

    fn loaded(rows: Vec<Task>) -> TaskList {
        let mut list = TaskList::new();
        assert!(list.begin_load());
        assert!(!list.finish_load(Ok(rows)));
        list
    }

    fn titles(list: &TaskList) -> Vec<&str> {
        list.entries().iter().map(Entry::title).collect()
    }

    #[test]
    fn load_orders_by_priority_then_newest() {
        let list = loaded(vec![
            stored("low", Priority::Low, 1),
            stored("high-old", Priority::High, 2),
            stored("medium", Priority::Medium, 3),
            stored("high-new", Priority::High, 4),
        ]);
        assert_eq!(titles(&list), vec!["high-new", "high-old", "medium", "low"]);
        assert!(!list.is_loading());
    }

    #[test]
    fn load_drops_owned_rows() {
        let mut owned = stored("secret", Priority::High, 9);
        owned.owner = Some(OwnerId::new("frank"));
        let list = loaded(vec![owned, stored("open", Priority::Low, 1)]);
        assert_eq!(titles(&list), vec!["open"]);
    }

    #[test]
    fn failed_load_keeps_mirror_and_raises_notice() {
        let mut list = loaded(vec![stored("keep", Priority::Low, 1)]);
        assert!(list.begin_load());
        assert!(list.is_loading());
        list.finish_load(Err(&RemoteError::ConnectionClosed));
        assert_eq!(titles(&list), vec!["keep"]);
        assert!(!list.is_loading());
        assert_eq!(
            list.notice().map(ToString::to_string).as_deref(),
            Some("Error loading tasks: connection closed")
        );
    }

    #[test]
    fn overlapping_loads_fold_into_one_follow_up() {
        let mut list = TaskList::new();
        assert!(list.begin_load());
        assert!(!list.begin_load());
        assert!(!list.begin_load());
        assert!(list.finish_load(Ok(vec![])));
        assert!(list.is_loading());
        assert!(!list.finish_load(Ok(vec![])));
        assert!(!list.is_loading());
    }

    #[test]
    fn blank_title_is_rejected_without_side_effects() {
        let mut list = loaded(vec![stored("a", Priority::Low, 1)]);
        list.drafts_mut().title = "   ".to_string();
        list.drafts_mut().priority = Priority::High;
        let err = list.submit().unwrap_err();
        assert_eq!(err, TaskError::TitleEmpty);
        assert_eq!(titles(&list), vec!["a"]);
        assert_eq!(list.drafts().priority, Priority::High);
        assert_eq!(list.in_flight(), 0);
        assert_eq!(
            list.notice(),
            Some(&Notice::Validation(TaskError::TitleEmpty))
        );
    }

    #[test]
    fn create_shows_provisional_row_and_resets_drafts() {
        let mut list = loaded(vec![stored("old", Priority::High, 1)]);
        list.drafts_mut().title = "  Buy milk ".to_string();
        list.drafts_mut().category = Category::Other;
        list.drafts_mut().priority = Priority::Low;

        let (_op, row) = list.submit().unwrap();
        assert_eq!(row.title, "Buy milk");
        assert!(!row.completed);
        assert!(row.owner.is_none());

        assert!(list.entries()[0].is_provisional());
        assert_eq!(titles(&list), vec!["Buy milk", "old"]);
        assert_eq!(list.drafts(), &Drafts::default());
    }

    #[test]
    fn create_success_replaces_provisional_by_invocation() {
        let mut list = TaskList::new();
        let (first, row1) = list.create("same", Category::Work, Priority::Low).unwrap();
        let (second, row2) = list.create("same", Category::Work, Priority::Low).unwrap();

        let t2 = row2.into_task(TaskId::new(), Timestamp::from_millis(2));
        list.finish_create(second, Ok(t2.clone()));
        // The second invocation's row is the head one; the first stays provisional.
        assert_eq!(list.entries()[0], Entry::Durable(t2));
        assert!(list.entries()[1].is_provisional());

        let t1 = row1.into_task(TaskId::new(), Timestamp::from_millis(1));
        list.finish_create(first, Ok(t1.clone()));
        assert_eq!(list.entries()[1], Entry::Durable(t1));
        assert_eq!(list.in_flight(), 0);
    }

    #[test]
    fn create_success_after_reload_drops_duplicate() {
        let mut list = TaskList::new();
        let (op, row) = list.create("dup", Category::Work, Priority::Medium).unwrap();
        let task = row.into_task(TaskId::new(), Timestamp::from_millis(5));

        // A reload lands before the insert reply.
        assert!(list.begin_load());
        list.finish_load(Ok(vec![task.clone()]));
        assert_eq!(list.entries().len(), 2);

        list.finish_create(op, Ok(task.clone()));
        assert_eq!(list.entries(), &[Entry::Durable(task)]);
    }

    #[test]
    fn create_failure_removes_row_and_restores_drafts() {
        let mut list = loaded(vec![stored("old", Priority::High, 1)]);
        let (op, _row) = list.create(" Walk dog ", Category::Work, Priority::High).unwrap();
        list.drafts_mut().title = "typing something else".to_string();

        list.finish_create(op, Err(&RemoteError::ConnectionClosed));
        assert_eq!(titles(&list), vec!["old"]);
        assert_eq!(
            list.drafts(),
            &Drafts {
                title: "Walk dog".to_string(),
                category: Category::Work,
                priority: Priority::High,
            }
        );
        assert_eq!(
            list.notice().map(ToString::to_string).as_deref(),
            Some("Error adding task: connection closed")
        );
    }

    #[test]
    fn toggle_flips_then_keeps_on_success() {
        let a = stored("a", Priority::High, 2);
        let b = stored("b", Priority::Low, 1);
        let mut list = loaded(vec![a.clone(), b.clone()]);

        let req = list.toggle(a.id, false);
        assert_eq!(req.filter, RowFilter::public_row(a.id));
        assert_eq!(req.patch, TaskPatch::completed(true));
        assert!(list.get(a.id).unwrap().completed);

        list.finish_toggle(req.op, Ok(1));
        assert!(list.get(a.id).unwrap().completed);
        assert!(!list.get(b.id).unwrap().completed);
    }

    #[test]
    fn toggle_zero_rows_is_success() {
        let a = stored("a", Priority::High, 2);
        let mut list = loaded(vec![a.clone()]);
        let req = list.toggle(a.id, false);
        list.finish_toggle(req.op, Ok(0));
        assert!(list.get(a.id).unwrap().completed);
        assert!(list.notice().is_none());
    }

    #[test]
    fn toggle_failure_reverts() {
        let a = stored("a", Priority::High, 2);
        let mut list = loaded(vec![a.clone()]);
        let req = list.toggle(a.id, false);
        list.finish_toggle(req.op, Err(&RemoteError::Timeout));
        assert!(!list.get(a.id).unwrap().completed);
        assert_eq!(
            list.notice().map(ToString::to_string).as_deref(),
            Some("Error updating task: store connection timed out")
        );
    }

    #[test]
    fn remove_then_success_drops_only_that_row() {
        let a = stored("a", Priority::High, 3);
        let b = stored("b", Priority::Medium, 2);
        let mut list = loaded(vec![a.clone(), b.clone()]);

        let req = list.remove(a.id);
        assert_eq!(req.filter, RowFilter::public_row(a.id));
        assert!(list.get(a.id).is_none());
        list.finish_remove(req.op, Ok(1));
        assert_eq!(titles(&list), vec!["b"]);
    }

    #[test]
    fn remove_failure_restores_snapshot_in_place() {
        let a = stored("a", Priority::High, 3);
        let mut b = stored("b", Priority::Medium, 2);
        b.completed = true;
        let c = stored("c", Priority::Low, 1);
        let mut list = loaded(vec![a, b.clone(), c]);

        let req = list.remove(b.id);
        assert_eq!(titles(&list), vec!["a", "c"]);
        list.finish_remove(req.op, Err(&RemoteError::Protocol("bad frame".into())));
        assert_eq!(titles(&list), vec!["a", "b", "c"]);
        assert_eq!(list.get(b.id), Some(&b));
        assert_eq!(
            list.notice().map(ToString::to_string).as_deref(),
            Some("Unexpected error deleting task")
        );
    }

    #[test]
    fn remove_failure_does_not_duplicate_reloaded_row() {
        let a = stored("a", Priority::High, 3);
        let mut list = loaded(vec![a.clone()]);
        let req = list.remove(a.id);

        assert!(list.begin_load());
        list.finish_load(Ok(vec![a.clone()]));

        list.finish_remove(req.op, Err(&RemoteError::ConnectionClosed));
        assert_eq!(list.entries(), &[Entry::Durable(a)]);
    }

    #[test]
    fn load_keeps_provisional_rows_at_head() {
        let mut list = TaskList::new();
        list.create("pending", Category::Work, Priority::Low).unwrap();
        assert!(list.begin_load());
        list.finish_load(Ok(vec![stored("x", Priority::High, 1)]));
        assert_eq!(titles(&list), vec!["pending", "x"]);
        assert!(list.entries()[0].is_provisional());
    }

    #[test]
    fn finish_for_unknown_op_is_ignored() {
        let mut list = loaded(vec![stored("a", Priority::Low, 1)]);
        list.finish_toggle(OpId(99), Err(&RemoteError::ConnectionClosed));
        list.finish_remove(OpId(99), Err(&RemoteError::ConnectionClosed));
        assert!(list.notice().is_none());
        assert_eq!(titles(&list), vec!["a"]);
    }
}
