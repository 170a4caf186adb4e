//! Integration tests for the optimistic edit flow.
//!
//! Drives `SyncController` against an `EmbeddedStore` on a paused clock, so
//! settle delays are stepped explicitly and every store call is observed.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tasksync::store::{EmbeddedStore, StoreError, TaskStore};
use tasksync::sync::collection::{by_priority_desc, insertion_order};
use tasksync::sync::{Field, NoticeLevel, SyncConfig, SyncController, SyncError, SyncEvents};
use tasksync_proto::rpc::StoreCall;
use tasksync_proto::task::{TaskId, TaskPriority, TaskStatus};
use tasksync_proto::{CreateTaskRequest, UpdateTaskRequest};

type Controller = SyncController<EmbeddedStore>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_controller() -> (Controller, SyncEvents, Arc<EmbeddedStore>) {
    let store = Arc::new(EmbeddedStore::new());
    let config = SyncConfig {
        request_timeout: None,
        ..SyncConfig::default()
    };
    let (ctrl, events) = SyncController::new(Arc::clone(&store), config);
    (ctrl, events, store)
}

/// Runs spawned work and applies the events it produced, leaving the
/// paused clock where it is.
async fn pump(ctrl: &mut Controller, events: &mut SyncEvents) {
    for _ in 0..20 {
        tokio::task::yield_now().await;
        while let Ok(event) = events.try_recv() {
            ctrl.handle_event(event);
        }
    }
}

async fn advance(ctrl: &mut Controller, events: &mut SyncEvents, ms: u64) {
    pump(ctrl, events).await;
    tokio::time::advance(Duration::from_millis(ms)).await;
    pump(ctrl, events).await;
}

async fn create(ctrl: &mut Controller, title: &str, priority: TaskPriority) -> TaskId {
    ctrl.create_task(CreateTaskRequest::new(title, priority))
        .await
        .unwrap()
        .id
}

// ===========================================================================
// Scenario
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn buy_milk_scenario() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Buy milk", TaskPriority::Low).await;
    ctrl.select(&id).unwrap();
    store.clear_calls();

    for _ in 0..3 {
        ctrl.set_title("Buy milk and eggs").unwrap();
        advance(&mut ctrl, &mut events, 150).await;
    }
    assert!(store.update_calls().is_empty(), "title still settling");

    ctrl.toggle_status().unwrap();
    pump(&mut ctrl, &mut events).await;
    let sent = store.update_calls();
    assert_eq!(sent.len(), 1, "status goes out at once");
    assert_eq!(sent[0].status, Some(TaskStatus::Done));
    assert!(sent[0].title.is_none());

    advance(&mut ctrl, &mut events, 500).await;
    let titles: Vec<_> = store
        .update_calls()
        .into_iter()
        .filter_map(|req| req.title)
        .collect();
    assert_eq!(titles, vec!["Buy milk and eggs"]);

    let selected = ctrl.selected().unwrap();
    assert_eq!(selected.title, "Buy milk and eggs");
    assert_eq!(selected.status, TaskStatus::Done);
    assert_eq!(selected, &store.tasks()[0]);
    assert!(ctrl.is_idle());
}

// ===========================================================================
// Laws
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn coalescing_sends_only_the_last_value() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Draft", TaskPriority::None).await;
    ctrl.select(&id).unwrap();

    for text in ["a", "ab", "abc", "abcd"] {
        ctrl.set_description(text).unwrap();
        advance(&mut ctrl, &mut events, 100).await;
    }
    ctrl.run_until_idle(&mut events).await;

    let sent = store.update_calls();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].description.as_deref(), Some("abcd"));
}

#[tokio::test(start_paused = true)]
async fn merge_law_confirmed_equals_response() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Call plumber", TaskPriority::None).await;
    ctrl.select(&id).unwrap();

    // Another writer changes the title while we edit the priority.
    store
        .update_task(UpdateTaskRequest {
            id: id.clone(),
            title: Some("Call the plumber".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    ctrl.set_priority(TaskPriority::High).unwrap();
    ctrl.run_until_idle(&mut events).await;

    assert!(!ctrl.is_pending(Field::Priority));
    assert_eq!(ctrl.view().unwrap(), store.tasks()[0]);
    assert_eq!(ctrl.selected().unwrap().title, "Call the plumber");
}

#[tokio::test(start_paused = true)]
async fn stale_response_law() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Write report", TaskPriority::None).await;
    ctrl.select(&id).unwrap();

    store.pause();
    ctrl.set_priority(TaskPriority::Low).unwrap();
    advance(&mut ctrl, &mut events, 230).await;
    ctrl.set_priority(TaskPriority::High).unwrap();

    store.resume();
    pump(&mut ctrl, &mut events).await;
    assert_eq!(ctrl.view().unwrap().priority, TaskPriority::High);
    assert!(ctrl.is_pending(Field::Priority));

    ctrl.run_until_idle(&mut events).await;
    assert_eq!(ctrl.selected().unwrap().priority, TaskPriority::High);
    assert_eq!(store.tasks()[0].priority, TaskPriority::High);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_responses_keep_newest_value_per_field() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Buy milk", TaskPriority::Low).await;
    ctrl.select(&id).unwrap();

    // Priority goes out first and is answered last.
    store.delay_next_reply(Duration::from_millis(2000));
    ctrl.set_priority(TaskPriority::High).unwrap();
    advance(&mut ctrl, &mut events, 230).await;

    store.delay_next_reply(Duration::from_millis(500));
    ctrl.set_title("Buy milk and eggs").unwrap();
    advance(&mut ctrl, &mut events, 500).await;

    ctrl.toggle_status().unwrap();
    ctrl.add_tag("groceries").unwrap();
    pump(&mut ctrl, &mut events).await;
    assert!(!ctrl.is_pending(Field::Status));
    assert!(!ctrl.is_pending(Field::Tags));
    assert!(ctrl.is_pending(Field::Title));
    assert!(ctrl.is_pending(Field::Priority));

    advance(&mut ctrl, &mut events, 500).await;
    assert!(!ctrl.is_pending(Field::Title));
    advance(&mut ctrl, &mut events, 1000).await;
    assert!(ctrl.is_idle());

    let stored = store.tasks()[0].clone();
    assert_eq!(stored.priority, TaskPriority::High);
    assert_eq!(stored.title, "Buy milk and eggs");
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.tags, vec!["groceries".to_string()]);
    assert_eq!(ctrl.view().unwrap(), stored);
    assert_eq!(ctrl.collection().get(&id).unwrap(), &stored);
}

#[tokio::test(start_paused = true)]
async fn title_length_boundaries() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Boundaries", TaskPriority::None).await;
    ctrl.select(&id).unwrap();
    store.clear_calls();

    for len in [0, 2, 251] {
        let err = ctrl.set_title("x".repeat(len)).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)), "len {len}");
        assert!(ctrl.field_error(Field::Title).is_some());
        advance(&mut ctrl, &mut events, 600).await;
    }
    assert!(store.calls().is_empty(), "invalid titles are never sent");

    for len in [3, 250] {
        ctrl.set_title("y".repeat(len)).unwrap();
        assert!(ctrl.field_error(Field::Title).is_none());
        advance(&mut ctrl, &mut events, 500).await;
        assert_eq!(store.tasks()[0].title.chars().count(), len);
    }
    assert_eq!(store.update_calls().len(), 2);
}

// ===========================================================================
// Selection and deletion
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn deleting_other_task_keeps_selection() {
    let (mut ctrl, _events, _store) = new_controller();
    let keep = create(&mut ctrl, "Keep me", TaskPriority::None).await;
    let doomed = create(&mut ctrl, "Drop me", TaskPriority::None).await;
    ctrl.select(&keep).unwrap();

    ctrl.delete_task(&doomed).await.unwrap();
    assert_eq!(ctrl.selected().unwrap().id, keep);
    assert_eq!(ctrl.collection().len(), 1);

    ctrl.delete_task(&keep).await.unwrap();
    assert!(ctrl.selected().is_none());
    assert!(ctrl.collection().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_of_vanished_task_removes_it_locally() {
    let (mut ctrl, _events, store) = new_controller();
    let id = create(&mut ctrl, "Gone soon", TaskPriority::None).await;
    store.delete_task(&id).await.unwrap();

    let err = ctrl.delete_task(&id).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert!(!ctrl.collection().contains(&id));
}

#[tokio::test(start_paused = true)]
async fn switching_selection_flushes_previous_edits() {
    let (mut ctrl, mut events, store) = new_controller();
    let first = create(&mut ctrl, "First task", TaskPriority::None).await;
    let second = create(&mut ctrl, "Second task", TaskPriority::None).await;

    ctrl.select(&first).unwrap();
    ctrl.set_title("First task, renamed").unwrap();
    ctrl.select(&second).unwrap();
    pump(&mut ctrl, &mut events).await;

    assert_eq!(store.update_calls().len(), 1);
    assert_eq!(
        ctrl.collection().get(&first).unwrap().title,
        "First task, renamed"
    );
    assert_eq!(ctrl.view().unwrap().id, second);
    assert!(!ctrl.is_pending(Field::Title));
}

#[tokio::test(start_paused = true)]
async fn update_failure_leaves_collection_with_optimistic_value() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Pay rent", TaskPriority::None).await;
    ctrl.select(&id).unwrap();

    store.fail_next(StoreError::Store("write conflict".to_string()));
    ctrl.add_tag("home").unwrap();
    pump(&mut ctrl, &mut events).await;

    assert!(ctrl.is_pending(Field::Tags));
    assert_eq!(ctrl.selected().unwrap().tags, vec!["home"]);
    assert!(store.tasks()[0].tags.is_empty());
    assert!(ctrl.last_error().unwrap().message.contains("write conflict"));
    let errors = ctrl
        .take_notices()
        .into_iter()
        .filter(|n| n.level == NoticeLevel::Error)
        .count();
    assert_eq!(errors, 1);
}

// ===========================================================================
// Refresh and projections
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn refresh_drops_tasks_missing_from_store() {
    let (mut ctrl, _events, store) = new_controller();
    let kept = create(&mut ctrl, "Still here", TaskPriority::None).await;
    let gone = create(&mut ctrl, "Removed elsewhere", TaskPriority::None).await;
    ctrl.select(&gone).unwrap();

    store.delete_task(&gone).await.unwrap();
    let added = store
        .create_task(CreateTaskRequest::new("Added elsewhere", TaskPriority::High))
        .await
        .unwrap();

    assert!(ctrl.refresh().await.unwrap());
    assert!(ctrl.collection().contains(&kept));
    assert!(ctrl.collection().contains(&added.id));
    assert!(!ctrl.collection().contains(&gone));
    assert!(ctrl.selected().is_none());
    assert!(ctrl.view().is_none());
}

#[tokio::test(start_paused = true)]
async fn projections_are_independent_views() {
    let (mut ctrl, _events, _store) = new_controller();
    create(&mut ctrl, "Low one", TaskPriority::Low).await;
    create(&mut ctrl, "High one", TaskPriority::High).await;
    create(&mut ctrl, "Medium one", TaskPriority::Medium).await;

    let collection = ctrl.collection();
    let by_priority = collection.project(|_| true, by_priority_desc);
    let in_order = collection.project(|_| true, insertion_order);

    let titles = |items: Vec<&tasksync_proto::Task>| -> Vec<String> {
        items.into_iter().map(|t| t.title.clone()).collect()
    };
    assert_eq!(
        titles(by_priority.iter().collect()),
        vec!["High one", "Medium one", "Low one"]
    );
    assert_eq!(
        titles(in_order.iter().collect()),
        vec!["Low one", "High one", "Medium one"]
    );
    // Restartable: iterating again yields the same sequence.
    assert_eq!(
        titles(by_priority.iter().collect()),
        vec!["High one", "Medium one", "Low one"]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_sends_queued_edits() {
    let (mut ctrl, mut events, store) = new_controller();
    let id = create(&mut ctrl, "Plan trip", TaskPriority::None).await;
    ctrl.select(&id).unwrap();
    ctrl.set_description("Book flights").unwrap();
    ctrl.set_priority(TaskPriority::Medium).unwrap();

    ctrl.shutdown(&mut events).await;

    let stored = &store.tasks()[0];
    assert_eq!(stored.description, "Book flights");
    assert_eq!(stored.priority, TaskPriority::Medium);
    assert!(ctrl.is_idle());
    assert!(matches!(
        store.calls().first(),
        Some(StoreCall::CreateTask(_))
    ));
}
