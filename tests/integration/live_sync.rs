//! Integration tests for live synchronisation through a hosted store.
//!
//! Runs `tasklist-server` in-process and connects several controllers to it
//! over WebSocket. These tests validate:
//! - a change made by one client shows up in every other client's list
//! - owned rows stay invisible and do not wake other clients
//! - store-side rejections surface as notices with the store's text
//! - oversized requests fail their own call instead of hanging
//! - losing the connection rolls back and reports, never panics
//! - teardown removes the feed on the server

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tasklist::controller::{Controller, DEFAULT_CHANNEL};
use tasklist::remote::ws::{ConnectOptions, WsStore};
use tasklist::remote::{RemoteStore, StoreMode};
use tasklist_proto::task::{Category, NewTask, OwnerId, Priority, TaskId};
use tasklist_server::server::ServerState;

/// Start the store in-process and return a ws:// URL plus its state.
async fn start_store() -> (String, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) =
        tasklist_server::server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .expect("failed to start store server");
    (format!("ws://{addr}/ws"), state, handle)
}

async fn client(url: &str) -> Controller<WsStore> {
    let store = WsStore::connect(url, ConnectOptions::default())
        .await
        .expect("failed to connect to store");
    let controller = Controller::new(store, DEFAULT_CHANNEL);
    controller.start().await.expect("start failed");
    controller
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

fn titles<S: RemoteStore>(c: &Controller<S>) -> Vec<String> {
    c.with_state(|s| s.entries().iter().map(|e| e.title().to_string()).collect())
}

fn completed<S: RemoteStore>(c: &Controller<S>, id: TaskId) -> Option<bool> {
    c.with_state(|s| s.get(id).map(|t| t.completed))
}

// =============================================================================
// Changes propagate between clients
// =============================================================================

#[tokio::test]
async fn create_toggle_delete_propagate() {
    let (url, _state, _handle) = start_store().await;
    let alice = client(&url).await;
    let bob = client(&url).await;
    assert_eq!(alice.mode(), StoreMode::Remote);

    let task = alice
        .create("plan sprint", Category::Work, Priority::High)
        .await
        .unwrap();
    wait_until(|| titles(&bob) == vec!["plan sprint".to_string()]).await;

    bob.toggle_completion(task.id, false).await.unwrap();
    wait_until(|| completed(&alice, task.id) == Some(true)).await;

    alice.remove(task.id, |_| true).await.unwrap();
    wait_until(|| titles(&bob).is_empty()).await;
    assert!(titles(&alice).is_empty());
}

#[tokio::test]
async fn late_joiner_sees_ordered_list() {
    let (url, _state, _handle) = start_store().await;
    let writer = client(&url).await;
    for (title, priority) in [
        ("low", Priority::Low),
        ("high-old", Priority::High),
        ("medium", Priority::Medium),
        ("high-new", Priority::High),
    ] {
        writer.create(title, Category::Other, priority).await.unwrap();
    }

    let reader = client(&url).await;
    assert_eq!(titles(&reader), vec!["high-new", "high-old", "medium", "low"]);
}

#[tokio::test]
async fn owned_rows_stay_invisible() {
    let (url, _state, _handle) = start_store().await;
    let viewer = client(&url).await;
    let raw = WsStore::connect(&url, ConnectOptions::default())
        .await
        .unwrap();

    raw.insert(NewTask {
        owner: Some(OwnerId::new("someone")),
        ..NewTask::public("private", Category::Personal, Priority::High)
    })
    .await
    .unwrap();
    raw.insert(NewTask::public("shared", Category::Personal, Priority::Low))
        .await
        .unwrap();

    wait_until(|| titles(&viewer) == vec!["shared".to_string()]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(titles(&viewer), vec!["shared".to_string()]);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn store_rejection_becomes_notice() {
    let (url, _state, _handle) = start_store().await;
    let c = client(&url).await;

    // Bypasses local validation to reach the store-side check.
    let err = c.store().insert(NewTask::public("   ", Category::Work, Priority::Low)).await;
    assert_eq!(
        err.unwrap_err().to_string(),
        "rejected: title must not be blank"
    );
    assert!(titles(&c).is_empty());
}

#[tokio::test]
async fn oversized_create_rolls_back_and_reports() {
    let (url, state, _handle) = start_store().await;
    let c = client(&url).await;
    let title = "x".repeat(70 * 1024);
    c.update_state(|s| {
        let d = s.drafts_mut();
        d.title.clone_from(&title);
        d.priority = Priority::High;
    });

    let result = tokio::time::timeout(Duration::from_secs(3), c.submit())
        .await
        .expect("oversized create never resolved");
    assert!(result.is_err());

    c.with_state(|s| {
        assert!(s.entries().is_empty());
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.drafts().title, title);
        assert_eq!(s.drafts().priority, Priority::High);
    });
    let notice = c.with_state(|s| s.notice().map(ToString::to_string)).unwrap();
    assert!(
        notice.starts_with("Error adding task: frame too large"),
        "got: {notice}"
    );
    assert!(state.table.is_empty().await);

    // The connection is still good for normal writes.
    c.create("fits", Category::Work, Priority::Low).await.unwrap();
    assert_eq!(titles(&c), vec!["fits".to_string()]);
}

#[tokio::test]
async fn lost_connection_rolls_back_toggle() {
    let (url, state, _handle) = start_store().await;
    let c = client(&url).await;
    let task = c
        .create("survive outage", Category::Work, Priority::Medium)
        .await
        .unwrap();

    state.close_all_connections().await;
    wait_until(|| !c.store().is_connected()).await;

    assert!(c.toggle_completion(task.id, false).await.is_err());
    assert_eq!(completed(&c, task.id), Some(false));
    assert_eq!(
        c.with_state(|s| s.notice().map(ToString::to_string)),
        Some("Error updating task: connection closed".to_string())
    );
}

#[tokio::test]
async fn shutdown_removes_server_feed() {
    let (url, state, _handle) = start_store().await;
    let c = client(&url).await;
    assert_eq!(state.subscription_count().await, 1);

    c.shutdown();
    c.shutdown();

    for _ in 0..200 {
        if state.subscription_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state.subscription_count().await, 0);
    assert!(!c.is_listening());
}
