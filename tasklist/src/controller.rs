//! Async driver for the task list.
//!
//! [`Controller`] owns a [`RemoteStore`] and a [`TaskList`]. Each public
//! method runs one transition on the list, performs the store call it asks
//! for, and feeds the outcome back. Methods take `&self`, so any number of
//! operations may be outstanding at once; only the short critical section
//! around the list is serialized. Concurrent operations on the same task are
//! not coordinated, and the last store reply wins.
//!
//! A background listener reloads the list on every change notification.

use std::sync::Arc;

use parking_lot::Mutex;
use tasklist_proto::filter::{Query, RowFilter};
use tasklist_proto::store::{ChangeEvent, SubscriptionId};
use tasklist_proto::task::{Category, NewTask, Priority, Task, TaskId};
use tokio::sync::mpsc;

use crate::remote::{RemoteError, RemoteStore, StoreMode};
use crate::tasks::state::{OpId, TaskList};
use crate::tasks::{DELETE_PROMPT, TaskError};

/// Default change feed channel name.
pub const DEFAULT_CHANNEL: &str = "public-tasks";

/// Errors returned by controller operations.
///
/// By the time one is returned the list has already been rolled back and a
/// notice raised; callers may ignore it.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Input was rejected before reaching the store.
    #[error(transparent)]
    Validation(#[from] TaskError),

    /// The store call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

struct Inner<S> {
    store: S,
    state: Mutex<TaskList>,
}

struct Feed {
    subscription: SubscriptionId,
    listener: tokio::task::JoinHandle<()>,
}

/// Drives a [`TaskList`] against a [`RemoteStore`].
pub struct Controller<S: RemoteStore> {
    inner: Arc<Inner<S>>,
    channel: String,
    feed: Mutex<Option<Feed>>,
}

impl<S: RemoteStore> Controller<S> {
    /// Creates a controller with an empty list. Nothing is fetched until
    /// [`start`](Self::start) or [`load`](Self::load).
    pub fn new(store: S, channel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(TaskList::new()),
            }),
            channel: channel.into(),
            feed: Mutex::new(None),
        }
    }

    /// Opens the change feed, then loads the list.
    ///
    /// The feed is opened first so no change between the fetch and the
    /// subscription goes unnoticed. A feed failure is reported as a notice
    /// and the load still runs.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let subscribed = self.subscribe().await;
        let loaded = self.load().await;
        subscribed?;
        loaded
    }

    async fn subscribe(&self) -> Result<(), ControllerError> {
        if self.feed.lock().is_some() {
            return Ok(());
        }
        match self
            .inner
            .store
            .subscribe(&self.channel, RowFilter::public())
            .await
        {
            Ok(sub) => {
                let listener = tokio::spawn(listen(Arc::clone(&self.inner), sub.events));
                let replaced = self.feed.lock().replace(Feed {
                    subscription: sub.id,
                    listener,
                });
                if let Some(old) = replaced {
                    close_feed(&self.inner.store, old);
                }
                tracing::info!(subscription = %sub.id, channel = %self.channel, "listening for task changes");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "could not open change feed");
                self.inner.state.lock().subscribe_failed(&e);
                Err(e.into())
            }
        }
    }

    /// Fetches every public task into the mirror.
    ///
    /// If a load is already running this one is folded into a single
    /// follow-up load and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last fetch performed by this call.
    pub async fn load(&self) -> Result<(), ControllerError> {
        self.inner.load().await.map_err(Into::into)
    }

    /// Creates a task from explicit values.
    ///
    /// Returns the stored row.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Validation`] for a blank title (no store call is
    /// made); [`ControllerError::Remote`] if the insert failed.
    pub async fn create(
        &self,
        title: &str,
        category: Category,
        priority: Priority,
    ) -> Result<Task, ControllerError> {
        let started = self.inner.state.lock().create(title, category, priority);
        self.inner.finish_create(started).await
    }

    /// Creates a task from the current drafts.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub async fn submit(&self) -> Result<Task, ControllerError> {
        let started = self.inner.state.lock().submit();
        self.inner.finish_create(started).await
    }

    /// Sets a task's completion flag to `!current`.
    ///
    /// # Errors
    ///
    /// Returns the store failure after the flag has been reverted.
    pub async fn toggle_completion(&self, id: TaskId, current: bool) -> Result<(), ControllerError> {
        let req = self.inner.state.lock().toggle(id, current);
        tracing::debug!(op = %req.op, task_id = %id, completed = !current, "updating task");
        let result = self.inner.store.update(req.filter, req.patch).await;
        match result {
            Ok(n) => {
                self.inner.state.lock().finish_toggle(req.op, Ok(n));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(op = %req.op, task_id = %id, error = %e, "update failed");
                self.inner.state.lock().finish_toggle(req.op, Err(&e));
                Err(e.into())
            }
        }
    }

    /// Deletes a task after asking `confirm` with [`DELETE_PROMPT`].
    ///
    /// Returns `false` without touching anything if `confirm` declines.
    ///
    /// # Errors
    ///
    /// Returns the store failure after the task has been restored.
    pub async fn remove<F>(&self, id: TaskId, confirm: F) -> Result<bool, ControllerError>
    where
        F: FnOnce(&str) -> bool,
    {
        if !confirm(DELETE_PROMPT) {
            tracing::debug!(task_id = %id, "delete declined");
            return Ok(false);
        }
        let req = self.inner.state.lock().remove(id);
        tracing::debug!(op = %req.op, task_id = %id, "deleting task");
        let result = self.inner.store.delete(req.filter).await;
        match result {
            Ok(n) => {
                self.inner.state.lock().finish_remove(req.op, Ok(n));
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(op = %req.op, task_id = %id, error = %e, "delete failed");
                self.inner.state.lock().finish_remove(req.op, Err(&e));
                Err(e.into())
            }
        }
    }

    /// Closes the change feed. Safe to call any number of times; the feed is
    /// closed once.
    pub fn shutdown(&self) {
        let feed = self.feed.lock().take();
        if let Some(feed) = feed {
            close_feed(&self.inner.store, feed);
        }
    }

    /// Whether the change feed is open.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.feed.lock().is_some()
    }

    /// Runs `f` with the list locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&TaskList) -> R) -> R {
        f(&self.inner.state.lock())
    }

    /// Runs `f` with the list locked for writing. For draft edits and
    /// notice dismissal.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut TaskList) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    /// Which kind of store backs this controller.
    pub fn mode(&self) -> StoreMode {
        self.inner.store.mode()
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }
}

impl<S: RemoteStore> Drop for Controller<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: RemoteStore> Inner<S> {
    async fn load(&self) -> Result<(), RemoteError> {
        if !self.state.lock().begin_load() {
            tracing::debug!("load already running, follow-up queued");
            return Ok(());
        }
        loop {
            let fetched = self.store.select(Query::public_tasks()).await;
            let (again, outcome) = match fetched {
                Ok(rows) => {
                    tracing::debug!(rows = rows.len(), "tasks loaded");
                    (self.state.lock().finish_load(Ok(rows)), Ok(()))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "loading tasks failed");
                    (self.state.lock().finish_load(Err(&e)), Err(e))
                }
            };
            if !again {
                return outcome;
            }
        }
    }

    async fn finish_create(
        &self,
        started: Result<(OpId, NewTask), TaskError>,
    ) -> Result<Task, ControllerError> {
        let (op, row) = started.inspect_err(|e| {
            tracing::debug!(error = %e, "task rejected locally");
        })?;
        tracing::debug!(op = %op, title = %row.title, "adding task");
        match self.store.insert(row).await {
            Ok(task) => {
                tracing::info!(op = %op, task_id = %task.id, "task added");
                self.state.lock().finish_create(op, Ok(task.clone()));
                Ok(task)
            }
            Err(e) => {
                tracing::warn!(op = %op, error = %e, "insert failed");
                self.state.lock().finish_create(op, Err(&e));
                Err(e.into())
            }
        }
    }
}

fn close_feed<S: RemoteStore>(store: &S, feed: Feed) {
    feed.listener.abort();
    store.unsubscribe(feed.subscription);
    tracing::info!(subscription = %feed.subscription, "change feed closed");
}

/// Reloads the list once per change notification until the feed ends.
async fn listen<S: RemoteStore>(inner: Arc<Inner<S>>, mut events: mpsc::Receiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        tracing::debug!(kind = %event.kind, task_id = %event.task_id, "task changed remotely");
        // Failures already raised a notice.
        let _ = inner.load().await;
    }
    tracing::debug!("change feed ended");
}
