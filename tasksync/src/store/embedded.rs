//! In-process task store.
//!
//! [`EmbeddedStore`] runs the same [`TaskBook`] the `tasksync-store` server
//! uses, without a network hop. It backs offline mode and doubles as a test
//! double: every call is recorded when it is issued, failures can be
//! injected, and responses can be held back with [`EmbeddedStore::pause`]
//! or delivered late with [`EmbeddedStore::delay_next_reply`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tasksync_proto::rpc::{StoreCall, StoreReply};
use tasksync_proto::{CreateTaskRequest, Task, TaskId, UpdateTaskRequest};
use tasksync_store::book::TaskBook;
use tokio::sync::watch;

use super::{StoreError, TaskStore, reply_deleted, reply_task, reply_tasks};

/// A task store living in the client process.
pub struct EmbeddedStore {
    book: Mutex<TaskBook>,
    /// Every call in the order it was issued.
    calls: Mutex<Vec<StoreCall>>,
    /// Errors returned instead of executing the next calls.
    failures: Mutex<VecDeque<StoreError>>,
    /// Reply delays for the next calls, consumed in issue order.
    reply_delays: Mutex<VecDeque<Duration>>,
    /// When set, the next listing reports "no change".
    withhold_listing: AtomicBool,
    /// `true` while responses are allowed through.
    gate: watch::Sender<bool>,
}

impl Default for EmbeddedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_book(TaskBook::new())
    }

    /// Creates a store over an existing book.
    #[must_use]
    pub fn with_book(book: TaskBook) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            book: Mutex::new(book),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            reply_delays: Mutex::new(VecDeque::new()),
            withhold_listing: AtomicBool::new(false),
            gate,
        }
    }

    /// Every call issued so far, including ones still held by [`pause`].
    ///
    /// [`pause`]: Self::pause
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// The `UpdateTask` requests issued so far.
    #[must_use]
    pub fn update_calls(&self) -> Vec<UpdateTaskRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::UpdateTask(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes the next call fail with `err` without touching the book.
    /// Queued failures are consumed in order.
    pub fn fail_next(&self, err: StoreError) {
        self.failures.lock().push_back(err);
    }

    /// Applies the next call to the book at once but delivers its reply
    /// only after `delay`, so later calls can be answered first.
    pub fn delay_next_reply(&self, delay: Duration) {
        self.reply_delays.lock().push_back(delay);
    }

    /// Makes the next `GetAllTasks` answer "no change".
    pub fn withhold_next_listing(&self) {
        self.withhold_listing.store(true, Ordering::Relaxed);
    }

    /// Holds every response until [`resume`](Self::resume). Calls are still
    /// recorded when issued.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Releases held responses.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// The tasks as currently stored.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.book.lock().all()
    }

    async fn execute(&self, call: StoreCall) -> Result<StoreReply, StoreError> {
        let name = call.name();
        self.calls.lock().push(call.clone());
        let delay = self.reply_delays.lock().pop_front();

        let mut gate = self.gate.subscribe();
        let open = gate.wait_for(|open| *open).await.is_ok();
        if !open {
            return Err(StoreError::Disconnected);
        }

        let injected = self.failures.lock().pop_front();
        if let Some(err) = injected {
            tracing::debug!(call = name, error = %err, "injected store failure");
            return Err(err);
        }
        if matches!(call, StoreCall::GetAllTasks) && self.withhold_listing.swap(false, Ordering::Relaxed) {
            return Ok(StoreReply::Tasks(None));
        }

        let outcome = self.book.lock().execute(call);
        if let Some(delay) = delay {
            tracing::debug!(call = name, ?delay, "delaying reply");
            tokio::time::sleep(delay).await;
        }
        outcome.map_err(StoreError::from)
    }
}

impl TaskStore for EmbeddedStore {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task, StoreError> {
        reply_task(self.execute(StoreCall::CreateTask(req)).await?)
    }

    async fn update_task(&self, req: UpdateTaskRequest) -> Result<Task, StoreError> {
        reply_task(self.execute(StoreCall::UpdateTask(req)).await?)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        reply_deleted(self.execute(StoreCall::DeleteTask(id.clone())).await?)
    }

    async fn get_all_tasks(&self) -> Result<Option<Vec<Task>>, StoreError> {
        reply_tasks(self.execute(StoreCall::GetAllTasks).await?)
    }

    async fn get_task_by_id(&self, id: &TaskId) -> Result<Task, StoreError> {
        reply_task(self.execute(StoreCall::GetTaskById(id.clone())).await?)
    }
}
