//! Integration tests for the sync engine over the WebSocket store.
//!
//! Starts an in-process `tasksync-store` server and drives one or two
//! `SyncController`s through `RemoteStore` connections, in real time with
//! short settle delays.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tasksync::store::{RemoteStore, StoreError, TaskStore};
use tasksync::sync::{Field, SyncConfig, SyncController, SyncError, SyncEvents};
use tasksync_proto::CreateTaskRequest;
use tasksync_proto::task::{TaskPriority, TaskStatus};
use tasksync_store::server::{self, StoreState};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> SyncConfig {
    SyncConfig {
        text_settle: Duration::from_millis(40),
        choice_settle: Duration::from_millis(20),
        search_settle: Duration::from_millis(40),
        request_timeout: Some(Duration::from_secs(5)),
    }
}

async fn start_store() -> (String, Arc<StoreState>) {
    let state = Arc::new(StoreState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("store should bind");
    (format!("ws://{addr}/rpc"), state)
}

async fn client(url: &str) -> (SyncController<RemoteStore>, SyncEvents) {
    let store = RemoteStore::connect(url, CONNECT_TIMEOUT)
        .await
        .expect("client should connect");
    let (mut ctrl, events) = SyncController::new(Arc::new(store), fast_config());
    ctrl.refresh().await.expect("initial refresh");
    (ctrl, events)
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn edits_reach_the_store() {
    let (url, state) = start_store().await;
    let (mut ctrl, mut events) = client(&url).await;

    let task = ctrl
        .create_task(CreateTaskRequest::new("Buy milk", TaskPriority::Low))
        .await
        .unwrap();
    ctrl.select(&task.id).unwrap();
    ctrl.set_title("Buy milk and eggs").unwrap();
    ctrl.set_priority(TaskPriority::High).unwrap();
    ctrl.toggle_status().unwrap();
    ctrl.add_tag("groceries").unwrap();
    ctrl.run_until_idle(&mut events).await;

    let stored = state.book.lock().await.get(&task.id).unwrap();
    assert_eq!(stored.title, "Buy milk and eggs");
    assert_eq!(stored.priority, TaskPriority::High);
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.tags, vec!["groceries"]);
    assert_eq!(ctrl.selected().unwrap(), &stored);
    for field in Field::ALL {
        assert!(!ctrl.is_pending(field), "{field} still pending");
    }
}

#[tokio::test]
async fn second_client_sees_changes_after_refresh() {
    let (url, _state) = start_store().await;
    let (mut alice, mut alice_events) = client(&url).await;
    let (mut bob, _bob_events) = client(&url).await;

    let task = alice
        .create_task(CreateTaskRequest::new("Shared chore", TaskPriority::None))
        .await
        .unwrap();
    alice.select(&task.id).unwrap();
    alice.set_description("Take out the bins").unwrap();
    alice.run_until_idle(&mut alice_events).await;

    assert!(bob.collection().is_empty());
    assert!(bob.refresh().await.unwrap());
    assert_eq!(
        bob.collection().get(&task.id).unwrap().description,
        "Take out the bins"
    );
}

#[tokio::test]
async fn update_of_task_deleted_elsewhere_removes_it() {
    let (url, _state) = start_store().await;
    let (mut alice, mut alice_events) = client(&url).await;
    let (mut bob, _bob_events) = client(&url).await;

    let task = alice
        .create_task(CreateTaskRequest::new("Short lived", TaskPriority::None))
        .await
        .unwrap();
    bob.refresh().await.unwrap();
    bob.delete_task(&task.id).await.unwrap();

    alice.select(&task.id).unwrap();
    alice.toggle_status().unwrap();
    alice.run_until_idle(&mut alice_events).await;

    assert!(!alice.collection().contains(&task.id));
    assert!(alice.selected().is_none());
    assert!(!alice.take_notices().is_empty());
}

#[tokio::test]
async fn store_rejection_surfaces_as_last_error() {
    let (url, _state) = start_store().await;
    let (mut ctrl, _events) = client(&url).await;

    // Bypass local validation to see the store's own check.
    let result = ctrl
        .store()
        .create_task(CreateTaskRequest::new("no", TaskPriority::None))
        .await;
    assert!(matches!(result, Err(StoreError::Validation(_))));

    let err = ctrl
        .create_task(CreateTaskRequest::new("no", TaskPriority::None))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(ctrl.collection().is_empty());
}

#[tokio::test]
async fn search_selects_across_remote_listing() {
    let (url, _state) = start_store().await;
    let (mut writer, _writer_events) = client(&url).await;
    for title in ["Renew passport", "Pass the salt", "Water plants"] {
        writer
            .create_task(CreateTaskRequest::new(title, TaskPriority::None))
            .await
            .unwrap();
    }

    let (mut ctrl, mut events) = client(&url).await;
    assert_eq!(ctrl.collection().len(), 3);
    ctrl.search("pass");
    ctrl.run_until_idle(&mut events).await;
    assert_eq!(ctrl.selected().unwrap().title, "Pass the salt");
}
