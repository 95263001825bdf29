//! In-process task store.
//!
//! [`MemoryStore`] keeps the `tasks` table in memory with the same semantics
//! as `tasklist-server`: store-assigned ids and strictly increasing
//! `created_at`, filtered updates and deletes, and change feeds. It backs
//! local mode (no store URL configured) and the test suites.
//!
//! For tests it also counts calls per operation, can fail the next call of
//! an operation with a given error, and can hold calls at a gate until
//! released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tasklist_proto::filter::{Query, RowFilter};
use tasklist_proto::codec;
use tasklist_proto::store::{
    ChangeEvent, ChangeKind, DEFAULT_MAX_FRAME_SIZE, RequestId, StoreError, StoreMessage, StoreOp,
    SubscriptionId, TASKS_TABLE,
};
use tasklist_proto::task::{NewTask, Task, TaskId, TaskPatch, Timestamp};
use tokio::sync::{Semaphore, mpsc};

use super::{RemoteError, RemoteStore, StoreMode, Subscription};

/// Default capacity of each change feed channel.
const DEFAULT_FEED_BUFFER: usize = 64;

/// Store operations, for counters, injected failures, and gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    /// [`RemoteStore::select`].
    Select,
    /// [`RemoteStore::insert`].
    Insert,
    /// [`RemoteStore::update`].
    Update,
    /// [`RemoteStore::delete`].
    Delete,
    /// [`RemoteStore::subscribe`].
    Subscribe,
    /// [`RemoteStore::unsubscribe`].
    Unsubscribe,
}

#[derive(Default)]
struct Table {
    by_id: HashMap<TaskId, Task>,
    last_stamp: u64,
}

struct Feed {
    filter: RowFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

/// In-memory [`RemoteStore`].
pub struct MemoryStore {
    table: Mutex<Table>,
    feeds: Mutex<HashMap<SubscriptionId, Feed>>,
    calls: Mutex<HashMap<StoreCall, usize>>,
    failures: Mutex<HashMap<StoreCall, VecDeque<RemoteError>>>,
    gates: Mutex<HashMap<StoreCall, Arc<Semaphore>>>,
    feed_buffer: usize,
    max_frame_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_buffer(DEFAULT_FEED_BUFFER)
    }

    /// Creates an empty store whose feeds hold up to `feed_buffer` events.
    #[must_use]
    pub fn with_feed_buffer(feed_buffer: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            feeds: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            feed_buffer: feed_buffer.max(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Rejects inserts whose request frame would exceed `max` bytes.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Writes a row as another client would: no counters, no injected
    /// failures, no title check. Open feeds are notified.
    pub fn seed(&self, row: NewTask) -> Task {
        let task = self.store_row(row);
        self.publish(ChangeKind::Insert, &task);
        task
    }

    /// Every row in the table, owned ones included, in display order.
    #[must_use]
    pub fn rows(&self) -> Vec<Task> {
        let everything = Query {
            filter: RowFilter::default(),
            ..Query::public_tasks()
        };
        let table = self.table.lock();
        everything.run(table.by_id.values())
    }

    /// How many times `call` has been invoked.
    #[must_use]
    pub fn calls(&self, call: StoreCall) -> usize {
        self.calls.lock().get(&call).copied().unwrap_or(0)
    }

    /// Number of open change feeds.
    #[must_use]
    pub fn open_feeds(&self) -> usize {
        self.feeds.lock().len()
    }

    /// Makes the next invocation of `call` fail with `error`. Queued errors
    /// are consumed in order.
    pub fn fail_next(&self, call: StoreCall, error: RemoteError) {
        self.failures.lock().entry(call).or_default().push_back(error);
    }

    /// Holds every later invocation of `call` until [`release`] or
    /// [`resume`] lets it through. Held calls are already counted.
    ///
    /// [`release`]: Self::release
    /// [`resume`]: Self::resume
    pub fn pause(&self, call: StoreCall) {
        self.gates.lock().insert(call, Arc::new(Semaphore::new(0)));
    }

    /// Lets `n` held invocations of `call` through.
    pub fn release(&self, call: StoreCall, n: usize) {
        let gate = self.gates.lock().get(&call).cloned();
        if let Some(gate) = gate {
            gate.add_permits(n);
        }
    }

    /// Removes the gate on `call`, letting every held invocation through.
    pub fn resume(&self, call: StoreCall) {
        let gate = self.gates.lock().remove(&call);
        if let Some(gate) = gate {
            gate.close();
        }
    }

    /// Counts the call, waits at its gate, then pops any injected failure.
    async fn enter(&self, call: StoreCall) -> Result<(), RemoteError> {
        *self.calls.lock().entry(call).or_default() += 1;
        let gate = self.gates.lock().get(&call).cloned();
        if let Some(gate) = gate {
            // A closed gate means resumed.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let failure = self.failures.lock().get_mut(&call).and_then(VecDeque::pop_front);
        match failure {
            Some(err) => {
                tracing::debug!(call = ?call, err = %err, "injected store failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Applies the hosted store's frame limit to an insert request.
    fn check_frame_size(&self, row: &NewTask) -> Result<(), RemoteError> {
        let request = StoreMessage::Request {
            id: RequestId(0),
            op: StoreOp::Insert {
                row: row.clone(),
                returning: true,
            },
        };
        let size = codec::encode(&request)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?
            .len();
        if size > self.max_frame_size {
            return Err(StoreError::TooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }
        Ok(())
    }

    fn store_row(&self, row: NewTask) -> Task {
        let mut table = self.table.lock();
        let stamp = Timestamp::now().as_millis().max(table.last_stamp + 1);
        table.last_stamp = stamp;
        let task = row.into_task(TaskId::new(), Timestamp::from_millis(stamp));
        table.by_id.insert(task.id, task.clone());
        task
    }

    fn publish(&self, kind: ChangeKind, task: &Task) {
        let mut feeds = self.feeds.lock();
        feeds.retain(|id, feed| {
            if !feed.filter.matches(task) {
                return true;
            }
            let event = ChangeEvent {
                kind,
                table: TASKS_TABLE.to_string(),
                task_id: task.id,
            };
            match feed.tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(subscription = %id, "feed full, dropping change");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl RemoteStore for MemoryStore {
    async fn select(&self, query: Query) -> Result<Vec<Task>, RemoteError> {
        self.enter(StoreCall::Select).await?;
        let table = self.table.lock();
        Ok(query.run(table.by_id.values()))
    }

    async fn insert(&self, row: NewTask) -> Result<Task, RemoteError> {
        self.enter(StoreCall::Insert).await?;
        if row.title.trim().is_empty() {
            return Err(RemoteError::Rejected("title must not be blank".to_string()));
        }
        self.check_frame_size(&row)?;
        let task = self.store_row(row);
        self.publish(ChangeKind::Insert, &task);
        Ok(task)
    }

    async fn update(&self, filter: RowFilter, patch: TaskPatch) -> Result<u64, RemoteError> {
        self.enter(StoreCall::Update).await?;
        let updated: Vec<Task> = {
            let mut table = self.table.lock();
            table
                .by_id
                .values_mut()
                .filter(|t| filter.matches(t))
                .map(|t| {
                    patch.apply(t);
                    t.clone()
                })
                .collect()
        };
        for task in &updated {
            self.publish(ChangeKind::Update, task);
        }
        Ok(updated.len() as u64)
    }

    async fn delete(&self, filter: RowFilter) -> Result<u64, RemoteError> {
        self.enter(StoreCall::Delete).await?;
        let removed: Vec<Task> = {
            let mut table = self.table.lock();
            let doomed: Vec<TaskId> = table
                .by_id
                .values()
                .filter(|t| filter.matches(t))
                .map(|t| t.id)
                .collect();
            doomed
                .iter()
                .filter_map(|id| table.by_id.remove(id))
                .collect()
        };
        for task in &removed {
            self.publish(ChangeKind::Delete, task);
        }
        Ok(removed.len() as u64)
    }

    async fn subscribe(&self, channel: &str, filter: RowFilter) -> Result<Subscription, RemoteError> {
        self.enter(StoreCall::Subscribe).await?;
        let id = SubscriptionId::new();
        let (tx, events) = mpsc::channel(self.feed_buffer);
        self.feeds.lock().insert(id, Feed { filter, tx });
        tracing::debug!(subscription = %id, channel = channel, "memory feed opened");
        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        *self.calls.lock().entry(StoreCall::Unsubscribe).or_default() += 1;
        self.feeds.lock().remove(&id);
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }
}
