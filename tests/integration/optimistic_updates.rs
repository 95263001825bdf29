//! Integration tests for optimistic create / toggle / delete.
//!
//! Drives a `Controller` against a shared `MemoryStore` and checks both the
//! local mirror and the store after each operation:
//! - creates land in the store and replace their provisional row
//! - blank titles never reach the store
//! - toggles and deletes roll back exactly what they changed on failure
//! - loads order by priority then recency and never show owned rows
//! - each change notification causes exactly one reload
//! - a failed feed-triggered reload keeps the mirror and reports
//! - teardown closes the feed once

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tasklist::controller::{Controller, ControllerError, DEFAULT_CHANNEL};
use tasklist::remote::{RemoteError, RemoteStore};
use tasklist::remote::memory::{MemoryStore, StoreCall};
use tasklist::tasks::state::{Entry, TaskList};
use tasklist::tasks::{DELETE_PROMPT, TaskError};
use tasklist_proto::filter::RowFilter;
use tasklist_proto::task::{Category, NewTask, OwnerId, Priority, Task};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Shared = Controller<Arc<MemoryStore>>;

fn setup() -> (Arc<MemoryStore>, Arc<Shared>) {
    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(Controller::new(Arc::clone(&store), DEFAULT_CHANNEL));
    (store, controller)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cond(), "condition not reached in time");
}

fn titles(c: &Shared) -> Vec<String> {
    c.with_state(|s| s.entries().iter().map(|e| e.title().to_string()).collect())
}

fn mirrored(c: &Shared, task: &Task) -> Option<Task> {
    c.with_state(|s| s.get(task.id).cloned())
}

fn notice(c: &Shared) -> Option<String> {
    c.with_state(|s| s.notice().map(ToString::to_string))
}

// ===========================================================================
// Create
// ===========================================================================

#[tokio::test]
async fn create_stores_one_public_incomplete_row() {
    let (store, c) = setup();
    c.load().await.unwrap();

    let task = c
        .create("  write report  ", Category::Work, Priority::High)
        .await
        .unwrap();

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.id, task.id);
    assert_eq!(row.title, "write report");
    assert_eq!(row.category, Category::Work);
    assert_eq!(row.priority, Priority::High);
    assert!(!row.completed);
    assert!(row.owner.is_none());

    assert_eq!(mirrored(&c, &task).as_ref(), Some(row));
    assert!(c.with_state(|s| s.entries().iter().all(|e| !e.is_provisional())));
}

#[tokio::test]
async fn blank_title_is_rejected_locally() {
    let (store, c) = setup();
    store.seed(NewTask::public("existing", Category::Other, Priority::Low));
    c.load().await.unwrap();
    let before = titles(&c);

    let err = c
        .create("   \t ", Category::Work, Priority::High)
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Validation(TaskError::TitleEmpty)));
    assert_eq!(titles(&c), before);
    assert_eq!(store.calls(StoreCall::Insert), 0);
    assert_eq!(notice(&c).as_deref(), Some("Please enter a task title"));
}

#[tokio::test]
async fn provisional_row_shows_before_insert_completes() {
    let (store, c) = setup();
    store.pause(StoreCall::Insert);
    c.update_state(|s| {
        let d = s.drafts_mut();
        d.title = "buy milk".to_string();
        d.category = Category::Other;
        d.priority = Priority::Low;
    });

    let pending = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.submit().await })
    };
    wait_until(|| store.calls(StoreCall::Insert) == 1).await;

    // Drafts reset and the row is shown at the head right away.
    c.with_state(|s| {
        assert!(s.drafts().title.is_empty());
        assert_eq!(s.drafts().category, Category::Personal);
        assert_eq!(s.drafts().priority, Priority::Medium);
        assert!(matches!(&s.entries()[0], Entry::Provisional { row, .. } if row.title == "buy milk"));
        assert_eq!(s.in_flight(), 1);
    });

    store.resume(StoreCall::Insert);
    let task = pending.await.unwrap().unwrap();
    c.with_state(|s| {
        assert_eq!(s.entries().len(), 1);
        assert_eq!(s.entries()[0].id(), Some(task.id));
        assert_eq!(s.in_flight(), 0);
    });
}

#[tokio::test]
async fn failed_create_restores_drafts() {
    let (store, c) = setup();
    store.fail_next(StoreCall::Insert, RemoteError::ConnectionClosed);
    c.update_state(|s| {
        let d = s.drafts_mut();
        d.title = "  call mom ".to_string();
        d.category = Category::Personal;
        d.priority = Priority::High;
    });

    assert!(c.submit().await.is_err());

    c.with_state(|s| {
        assert!(s.entries().is_empty());
        assert_eq!(s.drafts().title, "call mom");
        assert_eq!(s.drafts().priority, Priority::High);
    });
    assert!(store.rows().is_empty());
    assert_eq!(
        notice(&c).as_deref(),
        Some("Error adding task: connection closed")
    );
}

#[tokio::test]
async fn oversized_create_restores_drafts() {
    let (store, c) = setup();
    let title = "x".repeat(70 * 1024);
    c.update_state(|s| s.drafts_mut().title.clone_from(&title));

    assert!(c.submit().await.is_err());

    c.with_state(|s| {
        assert!(s.entries().is_empty());
        assert_eq!(s.drafts().title, title);
    });
    assert!(store.rows().is_empty());
    let notice = notice(&c).unwrap();
    assert!(
        notice.starts_with("Error adding task: frame too large"),
        "got: {notice}"
    );
}

// ===========================================================================
// Toggle
// ===========================================================================

#[tokio::test]
async fn toggle_flips_only_that_task() {
    let (store, c) = setup();
    let a = store.seed(NewTask::public("a", Category::Work, Priority::Low));
    let b = store.seed(NewTask::public("b", Category::Work, Priority::Low));
    c.load().await.unwrap();

    c.toggle_completion(a.id, false).await.unwrap();

    assert!(mirrored(&c, &a).unwrap().completed);
    assert!(!mirrored(&c, &b).unwrap().completed);
    let rows = store.rows();
    assert!(rows.iter().find(|t| t.id == a.id).unwrap().completed);
    assert!(!rows.iter().find(|t| t.id == b.id).unwrap().completed);
}

#[tokio::test]
async fn failed_toggle_reverts_flag() {
    let (store, c) = setup();
    let a = store.seed(NewTask::public("a", Category::Work, Priority::Low));
    c.load().await.unwrap();
    store.pause(StoreCall::Update);
    store.fail_next(StoreCall::Update, RemoteError::Rejected("rejected: nope".into()));

    let pending = {
        let c = Arc::clone(&c);
        let id = a.id;
        tokio::spawn(async move { c.toggle_completion(id, false).await })
    };
    wait_until(|| store.calls(StoreCall::Update) == 1).await;
    // Optimistic flip is visible while the update is outstanding.
    assert!(mirrored(&c, &a).unwrap().completed);

    store.resume(StoreCall::Update);
    assert!(pending.await.unwrap().is_err());

    assert!(!mirrored(&c, &a).unwrap().completed);
    assert!(!store.rows()[0].completed);
    assert_eq!(
        notice(&c).as_deref(),
        Some("Error updating task: rejected: nope")
    );
}

#[tokio::test]
async fn toggle_of_vanished_row_is_success() {
    let (store, c) = setup();
    let a = store.seed(NewTask::public("a", Category::Work, Priority::Low));
    c.load().await.unwrap();
    c.store()
        .delete(RowFilter::public_row(a.id))
        .await
        .unwrap();

    c.toggle_completion(a.id, false).await.unwrap();
    assert!(notice(&c).is_none());
    assert!(store.rows().is_empty());
}

// ===========================================================================
// Remove
// ===========================================================================

#[tokio::test]
async fn declined_remove_changes_nothing() {
    let (store, c) = setup();
    store.seed(NewTask::public("a", Category::Work, Priority::Low));
    let b = store.seed(NewTask::public("b", Category::Work, Priority::Low));
    c.load().await.unwrap();
    let before = titles(&c);

    let mut prompt = String::new();
    let removed = c
        .remove(b.id, |p| {
            prompt = p.to_string();
            false
        })
        .await
        .unwrap();

    assert!(!removed);
    assert_eq!(prompt, DELETE_PROMPT);
    assert_eq!(titles(&c), before);
    assert_eq!(store.rows().len(), 2);
    assert_eq!(store.calls(StoreCall::Delete), 0);
}

#[tokio::test]
async fn confirmed_remove_deletes_exactly_that_row() {
    let (store, c) = setup();
    let a = store.seed(NewTask::public("a", Category::Work, Priority::Low));
    let b = store.seed(NewTask::public("b", Category::Work, Priority::Low));
    c.load().await.unwrap();

    assert!(c.remove(b.id, |_| true).await.unwrap());

    assert!(mirrored(&c, &b).is_none());
    assert!(mirrored(&c, &a).is_some());
    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, a.id);
}

#[tokio::test]
async fn failed_remove_restores_row_in_place() {
    let (store, c) = setup();
    store.seed(NewTask::public("low", Category::Work, Priority::Low));
    let mid = store.seed(NewTask::public("mid", Category::Other, Priority::Medium));
    store.seed(NewTask::public("high", Category::Work, Priority::High));
    c.load().await.unwrap();
    c.toggle_completion(mid.id, false).await.unwrap();
    let before = titles(&c);
    let snapshot = mirrored(&c, &mid).unwrap();

    store.fail_next(StoreCall::Delete, RemoteError::Timeout);
    assert!(c.remove(mid.id, |_| true).await.is_err());

    assert_eq!(titles(&c), before);
    assert_eq!(mirrored(&c, &mid), Some(snapshot));
    assert_eq!(store.rows().len(), 3);
    assert_eq!(
        notice(&c).as_deref(),
        Some("Error deleting task: store connection timed out")
    );
}

// ===========================================================================
// Load
// ===========================================================================

#[tokio::test]
async fn load_orders_by_priority_then_newest() {
    let (store, c) = setup();
    let low = store.seed(NewTask::public("low", Category::Work, Priority::Low));
    let high_old = store.seed(NewTask::public("high-old", Category::Work, Priority::High));
    let medium = store.seed(NewTask::public("medium", Category::Work, Priority::Medium));
    let high_new = store.seed(NewTask::public("high-new", Category::Work, Priority::High));

    c.load().await.unwrap();

    let ids: Vec<_> = c.with_state(|s| s.entries().iter().filter_map(Entry::id).collect());
    assert_eq!(ids, vec![high_new.id, high_old.id, medium.id, low.id]);
    assert!(!c.with_state(TaskList::is_loading));
}

#[tokio::test]
async fn owned_rows_are_never_shown() {
    let (store, c) = setup();
    store.seed(NewTask::public("public", Category::Work, Priority::Low));
    store.seed(NewTask {
        owner: Some(OwnerId::new("someone")),
        ..NewTask::public("private", Category::Work, Priority::High)
    });

    c.load().await.unwrap();
    assert_eq!(titles(&c), vec!["public".to_string()]);
}

#[tokio::test]
async fn failed_load_keeps_mirror() {
    let (store, c) = setup();
    store.seed(NewTask::public("kept", Category::Work, Priority::Low));
    c.load().await.unwrap();

    store.seed(NewTask::public("unseen", Category::Work, Priority::Low));
    store.fail_next(StoreCall::Select, RemoteError::ConnectionClosed);
    assert!(c.load().await.is_err());

    assert_eq!(titles(&c), vec!["kept".to_string()]);
    assert!(!c.with_state(TaskList::is_loading));
    assert_eq!(
        notice(&c).as_deref(),
        Some("Error loading tasks: connection closed")
    );
}

// ===========================================================================
// Change feed
// ===========================================================================

#[tokio::test]
async fn one_notification_one_reload() {
    let (store, c) = setup();
    c.start().await.unwrap();
    let selects = store.calls(StoreCall::Select);

    store.seed(NewTask::public("from elsewhere", Category::Work, Priority::Low));

    wait_until(|| titles(&c) == vec!["from elsewhere".to_string()]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.calls(StoreCall::Select), selects + 1);
}

#[tokio::test]
async fn failed_feed_reload_keeps_mirror() {
    let (store, c) = setup();
    store.seed(NewTask::public("kept", Category::Work, Priority::Low));
    c.start().await.unwrap();
    assert_eq!(titles(&c), vec!["kept".to_string()]);
    let selects = store.calls(StoreCall::Select);

    store.fail_next(StoreCall::Select, RemoteError::ConnectionClosed);
    store.seed(NewTask::public("unseen", Category::Work, Priority::High));

    wait_until(|| store.calls(StoreCall::Select) == selects + 1).await;
    wait_until(|| notice(&c).is_some()).await;
    assert!(!c.with_state(TaskList::is_loading));
    assert_eq!(titles(&c), vec!["kept".to_string()]);
    assert_eq!(
        notice(&c).as_deref(),
        Some("Error loading tasks: connection closed")
    );
    assert!(c.is_listening());
}

#[tokio::test]
async fn owned_changes_do_not_notify() {
    let (store, c) = setup();
    c.start().await.unwrap();
    let selects = store.calls(StoreCall::Select);

    store.seed(NewTask {
        owner: Some(OwnerId::new("someone")),
        ..NewTask::public("private", Category::Work, Priority::High)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.calls(StoreCall::Select), selects);
}

#[tokio::test]
async fn teardown_closes_feed_once() {
    let (store, c) = setup();
    c.start().await.unwrap();
    assert_eq!(store.open_feeds(), 1);

    c.shutdown();
    c.shutdown();
    drop(c);

    assert_eq!(store.calls(StoreCall::Unsubscribe), 1);
    assert_eq!(store.open_feeds(), 0);

    // No reloads after teardown.
    let selects = store.calls(StoreCall::Select);
    store.seed(NewTask::public("late", Category::Work, Priority::Low));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.calls(StoreCall::Select), selects);
}
