//! Optimistic update controller.
//!
//! [`SyncController`] owns the task collection, the selection, and the
//! edit session of the selected task. Edits are validated and shown
//! immediately, then sent through the debouncer one field at a time.
//! Store responses come back as [`SyncEvent`]s and are merged so that a
//! response never overwrites a field the user has edited again since.
//!
//! The controller is driven by one task: call [`SyncController::handle_event`]
//! for every event received on the channel returned by
//! [`SyncController::new`], or let [`SyncController::run_until_idle`] do it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tasksync_proto::CreateTaskRequest;
use tasksync_proto::task::{Task, TaskId, TaskPriority, now_ms};
use tasksync_proto::validation::{ValidationError, validate_due_date, validate_title};
use tokio::sync::mpsc;

use super::collection::{TaskCollection, search_pattern};
use super::debounce::Debouncer;
use super::patch::{build_patch, tags_with, tags_without};
use super::{ErrorInfo, ErrorKind, Field, FieldValue, Notice, SyncError, copy_field};
use crate::store::{StoreError, TaskStore};

/// Timing knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Settle delay for title, description and due date edits.
    pub text_settle: Duration,
    /// Settle delay for priority edits.
    pub choice_settle: Duration,
    /// Settle delay before a search term selects its best match.
    pub search_settle: Duration,
    /// Upper bound for every store call; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            text_settle: Duration::from_millis(500),
            choice_settle: Duration::from_millis(230),
            search_settle: Duration::from_millis(500),
            request_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SyncConfig {
    /// How long edits to `field` settle before being sent. `None` means
    /// the edit is sent immediately.
    #[must_use]
    pub const fn settle_delay(&self, field: Field) -> Option<Duration> {
        match field {
            Field::Title | Field::Description | Field::DueDate => Some(self.text_settle),
            Field::Priority => Some(self.choice_settle),
            Field::Status | Field::Tags => None,
        }
    }
}

/// Debounce scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DebounceKey {
    /// Edits to one field of one task.
    Field(TaskId, Field),
    /// The search box.
    Search,
}

/// Work re-entering the controller.
#[derive(Debug)]
pub enum SyncEvent {
    /// A settle delay elapsed.
    Flush(DebounceKey),
    /// An update request completed.
    Settled {
        task_id: TaskId,
        field: Field,
        /// Revision of the edit that was sent.
        revision: u64,
        result: Result<Task, StoreError>,
    },
}

/// Receiving end of the controller's event channel.
pub type SyncEvents = mpsc::UnboundedReceiver<SyncEvent>;

/// The latest local value of one field, not yet confirmed by the store.
#[derive(Debug, Clone)]
struct PendingEdit {
    value: FieldValue,
    revision: u64,
    error: Option<ValidationError>,
    /// Set once this revision has been sent or queued behind an
    /// outstanding request.
    dispatched: bool,
}

/// State of the selected task.
#[derive(Debug)]
struct EditSession {
    confirmed: Task,
    /// `modified_at` of the store copy each confirmed field came from.
    confirmed_at: HashMap<Field, u64>,
    pending: HashMap<Field, PendingEdit>,
    last_error: Option<ErrorInfo>,
}

impl EditSession {
    fn new(confirmed: Task) -> Self {
        let confirmed_at = Field::ALL
            .into_iter()
            .map(|field| (field, confirmed.modified_at))
            .collect();
        Self {
            confirmed,
            confirmed_at,
            pending: HashMap::new(),
            last_error: None,
        }
    }

    fn id(&self) -> &TaskId {
        &self.confirmed.id
    }

    /// Confirmed values with every pending value on top, valid or not.
    fn view(&self) -> Task {
        let mut task = self.confirmed.clone();
        for edit in self.pending.values() {
            edit.value.apply_to(&mut task);
        }
        task
    }

    /// Pending values that passed validation.
    fn valid_values(&self) -> Vec<FieldValue> {
        self.pending
            .values()
            .filter(|e| e.error.is_none())
            .map(|e| e.value.clone())
            .collect()
    }

    /// What the collection should hold: confirmed plus valid pending values.
    fn canonical(&self) -> Task {
        let mut task = self.confirmed.clone();
        for value in self.valid_values() {
            value.apply_to(&mut task);
        }
        task
    }

    /// Takes the store's values for every field that is not pending.
    ///
    /// Responses can arrive in any order. A field is only taken from a copy
    /// at least as recent as the one that last set it; the store bumps
    /// `modified_at` on every write.
    fn merge_confirmed(&mut self, server: &Task) {
        for field in Field::ALL {
            if self.pending.contains_key(&field) {
                continue;
            }
            let set_at = self.confirmed_at.get(&field).copied().unwrap_or_default();
            if server.modified_at < set_at {
                tracing::debug!(
                    task_id = %server.id,
                    ?field,
                    modified_at = server.modified_at,
                    set_at,
                    "keeping newer confirmed value"
                );
                continue;
            }
            copy_field(&mut self.confirmed, server, field);
            self.confirmed_at.insert(field, server.modified_at);
        }
        if server.modified_at >= self.confirmed.modified_at {
            self.confirmed.created_at = server.created_at;
            self.confirmed.modified_at = server.modified_at;
        }
    }
}

/// An update request that has been sent and not yet answered.
#[derive(Debug)]
struct InFlight {
    revision: u64,
    value: FieldValue,
}

type FieldKey = (TaskId, Field);

/// The optimistic synchronization engine.
pub struct SyncController<S> {
    store: Arc<S>,
    config: SyncConfig,
    collection: TaskCollection,
    session: Option<EditSession>,
    debouncer: Debouncer<DebounceKey>,
    /// Flush events scheduled or fired but not yet handled.
    expected_flushes: usize,
    events: mpsc::UnboundedSender<SyncEvent>,
    /// At most one outstanding update per task field.
    in_flight: HashMap<FieldKey, InFlight>,
    /// Newer values waiting for the outstanding update of their field.
    deferred: HashMap<FieldKey, (FieldValue, u64)>,
    next_revision: u64,
    notices: Vec<Notice>,
    search_term: String,
    search: Option<Regex>,
}

impl<S: TaskStore> SyncController<S> {
    /// Creates a controller over `store` with an empty collection.
    ///
    /// Every [`SyncEvent`] arriving on the returned receiver must be passed
    /// back to [`handle_event`](Self::handle_event).
    #[must_use]
    pub fn new(store: Arc<S>, config: SyncConfig) -> (Self, SyncEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            config,
            collection: TaskCollection::new(),
            session: None,
            debouncer: Debouncer::new(),
            expected_flushes: 0,
            events,
            in_flight: HashMap::new(),
            deferred: HashMap::new(),
            next_revision: 0,
            notices: Vec::new(),
            search_term: String::new(),
            search: None,
        };
        (controller, rx)
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The canonical task collection.
    #[must_use]
    pub const fn collection(&self) -> &TaskCollection {
        &self.collection
    }

    /// The selected task as stored in the collection.
    #[must_use]
    pub fn selected(&self) -> Option<&Task> {
        self.collection.selected()
    }

    /// The selected task as the user sees it, including pending values
    /// that failed validation.
    #[must_use]
    pub fn view(&self) -> Option<Task> {
        self.session.as_ref().map(EditSession::view)
    }

    /// The validation error currently attached to `field` of the selected
    /// task.
    #[must_use]
    pub fn field_error(&self, field: Field) -> Option<&ValidationError> {
        self.session
            .as_ref()?
            .pending
            .get(&field)
            .and_then(|e| e.error.as_ref())
    }

    /// The most recent store error for the selected task.
    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.session.as_ref()?.last_error.as_ref()
    }

    /// Whether `field` of the selected task has an unconfirmed local value.
    #[must_use]
    pub fn is_pending(&self, field: Field) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.pending.contains_key(&field))
    }

    /// Drains the accumulated notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Whether no timer is queued and no request is outstanding.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.expected_flushes == 0 && self.in_flight.is_empty()
    }

    // -----------------------------------------------------------------------
    // Collection-level operations
    // -----------------------------------------------------------------------

    /// Fetches every task and merges the listing into the collection.
    ///
    /// Returns `false` if the store reported no change. Pending local
    /// values survive the refresh.
    ///
    /// # Errors
    ///
    /// [`SyncError::Store`] if the call fails; the collection is untouched.
    pub async fn refresh(&mut self) -> Result<bool, SyncError> {
        let store = Arc::clone(&self.store);
        match bounded(self.config.request_timeout, store.get_all_tasks()).await {
            Ok(Some(tasks)) => {
                self.apply_listing(tasks);
                Ok(true)
            }
            Ok(None) => {
                tracing::debug!("store reported no change");
                Ok(false)
            }
            Err(err) => {
                self.surface("Refresh", &err, None, None);
                Err(err.into())
            }
        }
    }

    /// Creates a task and adds it to the collection.
    ///
    /// # Errors
    ///
    /// [`SyncError::Validation`] if the title or due date is rejected
    /// locally (nothing is sent), [`SyncError::Store`] if the call fails.
    pub async fn create_task(&mut self, req: CreateTaskRequest) -> Result<Task, SyncError> {
        validate_title(&req.title)?;
        if let Some(due) = req.due_date {
            validate_due_date(due, now_ms())?;
        }

        let store = Arc::clone(&self.store);
        match bounded(self.config.request_timeout, store.create_task(req)).await {
            Ok(task) => {
                if let Err(e) = self.collection.apply_create(task.clone()) {
                    tracing::error!(error = %e, "store returned an id already in the collection");
                } else {
                    tracing::info!(task_id = %task.id, "task created");
                }
                self.notices
                    .push(Notice::info(format!("Created \"{}\"", task.title)));
                Ok(task)
            }
            Err(err) => {
                self.surface("Create", &err, None, None);
                Err(err.into())
            }
        }
    }

    /// Deletes a task once the store confirms it.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if the store no longer has it (the task is
    /// still removed locally), [`SyncError::Store`] on any other failure
    /// (nothing changes locally).
    pub async fn delete_task(&mut self, id: &TaskId) -> Result<(), SyncError> {
        let store = Arc::clone(&self.store);
        match bounded(self.config.request_timeout, store.delete_task(id)).await {
            Ok(()) => {
                let title = self.forget_task(id).map(|t| t.title);
                tracing::info!(task_id = %id, "task deleted");
                self.notices.push(Notice::info(format!(
                    "Deleted \"{}\"",
                    title.unwrap_or_else(|| id.to_string())
                )));
                Ok(())
            }
            Err(StoreError::NotFound(msg)) => {
                tracing::warn!(task_id = %id, %msg, "task already gone from store");
                self.forget_task(id);
                self.notices
                    .push(Notice::error(format!("Task {id} no longer exists")));
                Err(SyncError::NotFound(id.clone()))
            }
            Err(err) => {
                self.surface("Delete", &err, None, Some(id));
                Err(err.into())
            }
        }
    }

    /// Re-reads one task from the store.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if the store no longer has it (the task is
    /// removed locally), [`SyncError::Store`] on any other failure.
    pub async fn reload_task(&mut self, id: &TaskId) -> Result<Task, SyncError> {
        let store = Arc::clone(&self.store);
        match bounded(self.config.request_timeout, store.get_task_by_id(id)).await {
            Ok(task) => {
                self.merge_server_task(task.clone());
                Ok(task)
            }
            Err(StoreError::NotFound(_)) => {
                self.forget_task(id);
                self.notices
                    .push(Notice::error(format!("Task {id} no longer exists")));
                Err(SyncError::NotFound(id.clone()))
            }
            Err(err) => {
                self.surface("Reload", &err, None, Some(id));
                Err(err.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Opens an edit session on `id`, ending the current one.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if the task is not in the collection; the
    /// current session is kept.
    pub fn select(&mut self, id: &TaskId) -> Result<(), SyncError> {
        if self.session.as_ref().is_some_and(|s| s.id() == id) {
            return Ok(());
        }
        if !self.collection.contains(id) {
            return Err(SyncError::NotFound(id.clone()));
        }
        self.end_session(true);
        let task = self
            .collection
            .select(id)
            .map_err(|_| SyncError::NotFound(id.clone()))?
            .clone();
        tracing::info!(task_id = %id, "task selected");
        self.session = Some(EditSession::new(task));
        Ok(())
    }

    /// Ends the current session.
    ///
    /// Edits still waiting for their settle delay are sent right away;
    /// their responses land in the collection only.
    pub fn deselect(&mut self) {
        self.end_session(true);
        self.collection.deselect();
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Edits one field of the selected task.
    ///
    /// The value is shown immediately. A valid value is sent after the
    /// field's settle delay (or immediately for status and tags). An
    /// invalid value is kept for display with its error, and any send
    /// still queued for the field is cancelled.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoSelection`] without a selected task,
    /// [`SyncError::Validation`] if the value is rejected locally.
    pub fn edit(&mut self, value: FieldValue) -> Result<(), SyncError> {
        let revision = self.next_revision + 1;
        let session = self.session.as_mut().ok_or(SyncError::NoSelection)?;
        self.next_revision = revision;

        let field = value.field();
        let task_id = session.id().clone();
        let key = DebounceKey::Field(task_id.clone(), field);
        let validation = value.validate(now_ms());

        session.pending.insert(
            field,
            PendingEdit {
                value,
                revision,
                error: validation.clone().err(),
                dispatched: false,
            },
        );
        let canonical = session.canonical();
        self.collection.apply_update(canonical);

        if let Err(err) = validation {
            self.cancel_flush(&key);
            self.deferred.remove(&(task_id.clone(), field));
            tracing::debug!(task_id = %task_id, ?field, error = %err, "edit rejected locally");
            return Err(err.into());
        }

        match self.config.settle_delay(field) {
            Some(delay) => {
                tracing::debug!(task_id = %task_id, ?field, revision, "edit queued");
                self.schedule_flush(key, delay);
            }
            None => {
                self.cancel_flush(&key);
                self.flush_field(&task_id, field);
            }
        }
        Ok(())
    }

    /// Sets the title.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), SyncError> {
        self.edit(FieldValue::Title(title.into()))
    }

    /// Sets the description.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), SyncError> {
        self.edit(FieldValue::Description(description.into()))
    }

    /// Sets the priority.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn set_priority(&mut self, priority: TaskPriority) -> Result<(), SyncError> {
        self.edit(FieldValue::Priority(priority))
    }

    /// Sets or clears the due date.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn set_due_date(&mut self, due: Option<u64>) -> Result<(), SyncError> {
        self.edit(FieldValue::DueDate(due))
    }

    /// Flips TODO and DONE.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoSelection`] without a selected task.
    pub fn toggle_status(&mut self) -> Result<(), SyncError> {
        let status = self.view().ok_or(SyncError::NoSelection)?.status;
        self.edit(FieldValue::Status(status.toggled()))
    }

    /// Adds a tag to the current (confirmed plus pending) tag set. Adding a
    /// tag that is already present does nothing.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn add_tag(&mut self, tag: &str) -> Result<(), SyncError> {
        let current = self.view().ok_or(SyncError::NoSelection)?.tags;
        match tags_with(&current, tag) {
            Some(tags) => self.edit(FieldValue::Tags(tags)),
            None => Ok(()),
        }
    }

    /// Removes a tag from the current tag set. Removing an absent tag does
    /// nothing.
    ///
    /// # Errors
    ///
    /// As [`edit`](Self::edit).
    pub fn remove_tag(&mut self, tag: &str) -> Result<(), SyncError> {
        let current = self.view().ok_or(SyncError::NoSelection)?.tags;
        match tags_without(&current, tag) {
            Some(tags) => self.edit(FieldValue::Tags(tags)),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Updates the search term. Matching titles are highlighted at once;
    /// the best match is selected once the term settles. A blank term
    /// clears the search.
    pub fn search(&mut self, term: &str) {
        term.clone_into(&mut self.search_term);
        self.search = search_pattern(term);
        if self.search.is_none() {
            self.cancel_flush(&DebounceKey::Search);
            return;
        }
        self.schedule_flush(DebounceKey::Search, self.config.search_settle);
    }

    #[must_use]
    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    /// Whether `task`'s title matches the current search term.
    #[must_use]
    pub fn is_highlighted(&self, task: &Task) -> bool {
        self.search
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&task.title))
    }

    // -----------------------------------------------------------------------
    // Event pump
    // -----------------------------------------------------------------------

    /// Applies one event.
    pub fn handle_event(&mut self, event: SyncEvent) {
        if matches!(event, SyncEvent::Flush(_)) {
            self.expected_flushes = self.expected_flushes.saturating_sub(1);
        }
        match event {
            SyncEvent::Flush(DebounceKey::Field(task_id, field)) => {
                self.flush_field(&task_id, field);
            }
            SyncEvent::Flush(DebounceKey::Search) => self.settle_search(),
            SyncEvent::Settled {
                task_id,
                field,
                revision,
                result,
            } => self.settle(task_id, field, revision, result),
        }
    }

    /// Handles events until no timer is queued and no request is
    /// outstanding.
    pub async fn run_until_idle(&mut self, events: &mut SyncEvents) {
        while !self.is_idle() {
            match events.recv().await {
                Some(event) => self.handle_event(event),
                None => return,
            }
        }
    }

    /// Sends every queued edit and waits for all outstanding requests.
    pub async fn shutdown(&mut self, events: &mut SyncEvents) {
        self.deselect();
        self.cancel_flush(&DebounceKey::Search);
        self.run_until_idle(events).await;
        tracing::info!("sync engine idle");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Arranges for `Flush(key)` to arrive once `delay` passes quietly.
    fn schedule_flush(&mut self, key: DebounceKey, delay: Duration) {
        let events = self.events.clone();
        let flush = SyncEvent::Flush(key.clone());
        let replaced = self.debouncer.schedule(key, delay, async move {
            let _ = events.send(flush);
        });
        if !replaced {
            self.expected_flushes += 1;
        }
    }

    /// Drops a queued flush. A flush that already fired still arrives and
    /// is ignored by its handler.
    fn cancel_flush(&mut self, key: &DebounceKey) -> bool {
        let cancelled = self.debouncer.cancel(key);
        if cancelled {
            self.expected_flushes = self.expected_flushes.saturating_sub(1);
        }
        cancelled
    }

    /// Sends the pending value of `field` if it has not been sent yet.
    fn flush_field(&mut self, task_id: &TaskId, field: Field) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == task_id) else {
            tracing::debug!(task_id = %task_id, ?field, "flush for task no longer selected");
            return;
        };
        let Some(edit) = session.pending.get_mut(&field) else {
            return;
        };
        if edit.error.is_some() || edit.dispatched {
            return;
        }
        edit.dispatched = true;
        let (value, revision) = (edit.value.clone(), edit.revision);
        self.send_or_defer(task_id.clone(), value, revision);
    }

    fn send_or_defer(&mut self, task_id: TaskId, value: FieldValue, revision: u64) {
        let key = (task_id, value.field());
        if self.in_flight.contains_key(&key) {
            tracing::debug!(task_id = %key.0, field = ?key.1, revision, "update outstanding, deferring");
            self.deferred.insert(key, (value, revision));
        } else {
            self.dispatch(key, value, revision);
        }
    }

    fn dispatch(&mut self, key: FieldKey, value: FieldValue, revision: u64) {
        let (task_id, field) = key;
        let request = build_patch(&task_id, [value.clone()]).into_request();
        tracing::debug!(task_id = %task_id, ?field, revision, "sending update");
        self.in_flight
            .insert((task_id.clone(), field), InFlight { revision, value });

        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            let result = bounded(timeout, store.update_task(request)).await;
            let _ = events.send(SyncEvent::Settled {
                task_id,
                field,
                revision,
                result,
            });
        });
    }

    fn settle(
        &mut self,
        task_id: TaskId,
        field: Field,
        revision: u64,
        result: Result<Task, StoreError>,
    ) {
        let key = (task_id, field);
        self.in_flight.remove(&key);
        let (task_id, field) = key;

        match result {
            Ok(task) => self.apply_update_response(&task_id, field, revision, task),
            Err(StoreError::NotFound(msg)) => {
                tracing::warn!(task_id = %task_id, ?field, %msg, "task vanished from store");
                self.notices
                    .push(Notice::error(format!("Task {task_id} no longer exists")));
                self.forget_task(&task_id);
            }
            Err(err) => {
                self.surface(
                    &format!("Saving {field}"),
                    &err,
                    Some(field),
                    Some(&task_id),
                );
            }
        }

        let key = (task_id, field);
        if let Some((value, revision)) = self.deferred.remove(&key)
            && self.collection.contains(&key.0)
        {
            self.dispatch(key, value, revision);
        }
    }

    fn apply_update_response(&mut self, task_id: &TaskId, field: Field, revision: u64, task: Task) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == task_id) else {
            // Session ended while the request was out: only the collection
            // is updated, keeping values still on their way to the store.
            if is_older_than_held(&self.collection, &task) {
                tracing::debug!(task_id = %task_id, ?field, "late response older than held copy");
                return;
            }
            let mut merged = task;
            overlay_requests(&self.in_flight, &self.deferred, &mut merged);
            self.collection.apply_update(merged);
            return;
        };

        match session.pending.get(&field).map(|e| e.revision) {
            Some(current) if current == revision => {
                session.pending.remove(&field);
                if session
                    .last_error
                    .as_ref()
                    .is_some_and(|e| e.field == Some(field))
                {
                    session.last_error = None;
                }
            }
            Some(current) => {
                tracing::debug!(
                    task_id = %task_id,
                    ?field,
                    sent = revision,
                    current,
                    "stale response, newer edit pending"
                );
            }
            None => {}
        }
        session.merge_confirmed(&task);
        let canonical = session.canonical();
        self.collection.apply_update(canonical);
    }

    /// Merges an authoritative copy of a task fetched outside the edit flow.
    fn merge_server_task(&mut self, task: Task) {
        if let Some(session) = self.session.as_mut().filter(|s| *s.id() == task.id) {
            session.merge_confirmed(&task);
            let canonical = session.canonical();
            self.collection.apply_update(canonical);
            return;
        }
        if is_older_than_held(&self.collection, &task) {
            return;
        }
        let mut merged = task;
        overlay_requests(&self.in_flight, &self.deferred, &mut merged);
        if self.collection.contains(&merged.id) {
            self.collection.apply_update(merged);
        } else if let Err(e) = self.collection.apply_create(merged) {
            tracing::error!(error = %e, "failed to insert reloaded task");
        }
    }

    fn apply_listing(&mut self, tasks: Vec<Task>) {
        let tasks: Vec<Task> = tasks
            .into_iter()
            .map(|task| match self.collection.get(&task.id) {
                Some(held) if held.modified_at > task.modified_at => held.clone(),
                _ => task,
            })
            .collect();
        let session_values = self.session.as_mut().map(|session| {
            if let Some(server) = tasks.iter().find(|t| t.id == session.confirmed.id) {
                session.merge_confirmed(server);
            }
            (session.id().clone(), session.valid_values())
        });

        let in_flight = &self.in_flight;
        let deferred = &self.deferred;
        self.collection.apply_snapshot(tasks, |task| match &session_values {
            Some((id, values)) if *id == task.id => {
                for value in values {
                    value.apply_to(task);
                }
            }
            _ => overlay_requests(in_flight, deferred, task),
        });

        if let Some(id) = self.session.as_ref().map(|s| s.id().clone())
            && !self.collection.contains(&id)
        {
            tracing::info!(task_id = %id, "selected task removed by refresh");
            self.notices
                .push(Notice::error(format!("Task {id} no longer exists")));
            self.end_session(false);
        }
    }

    /// Removes every trace of a task that no longer exists.
    fn forget_task(&mut self, id: &TaskId) -> Option<Task> {
        if self.session.as_ref().is_some_and(|s| s.id() == id) {
            self.end_session(false);
        }
        self.deferred.retain(|(task_id, _), _| task_id != id);
        self.collection.apply_delete(id)
    }

    /// Drops the edit session. With `flush`, valid edits that have not been
    /// sent yet are sent now instead of waiting for their settle delay.
    fn end_session(&mut self, flush: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        let task_id = session.confirmed.id.clone();
        for (field, edit) in session.pending {
            let was_queued = self.cancel_flush(&DebounceKey::Field(task_id.clone(), field));
            if flush && edit.error.is_none() && !edit.dispatched {
                tracing::debug!(task_id = %task_id, ?field, was_queued, "flushing edit on deselect");
                self.send_or_defer(task_id.clone(), edit.value, edit.revision);
            }
        }
        tracing::debug!(task_id = %task_id, flush, "edit session ended");
    }

    fn settle_search(&mut self) {
        let Some(pattern) = &self.search else {
            return;
        };
        let best = self.collection.best_match(pattern).map(|t| t.id.clone());
        match best {
            Some(id) => {
                tracing::debug!(term = %self.search_term, task_id = %id, "search settled");
                if let Err(e) = self.select(&id) {
                    tracing::debug!(error = %e, "search match could not be selected");
                }
            }
            None => {
                tracing::debug!(term = %self.search_term, "search matched nothing");
            }
        }
    }

    /// Reports a store failure as a notice and, when it concerns the
    /// selected task, as its `last_error`.
    fn surface(
        &mut self,
        context: &str,
        err: &StoreError,
        field: Option<Field>,
        task_id: Option<&TaskId>,
    ) {
        tracing::warn!(context, ?field, error = %err, "store call failed");
        self.notices
            .push(Notice::error(format!("{context} failed: {err}")));
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|s| task_id.is_some_and(|id| id == s.id()))
        {
            session.last_error = Some(ErrorInfo {
                kind: ErrorKind::Store,
                field,
                message: err.to_string(),
            });
        }
    }
}

/// Whether the collection already holds a copy of `task` written later.
fn is_older_than_held(collection: &TaskCollection, task: &Task) -> bool {
    collection
        .get(&task.id)
        .is_some_and(|held| held.modified_at > task.modified_at)
}

/// Applies values that are in flight or deferred for `task`.
fn overlay_requests(
    in_flight: &HashMap<FieldKey, InFlight>,
    deferred: &HashMap<FieldKey, (FieldValue, u64)>,
    task: &mut Task,
) {
    for ((id, _), flight) in in_flight {
        if *id == task.id {
            flight.value.apply_to(task);
        }
    }
    for ((id, _), (value, _)) in deferred {
        if *id == task.id {
            value.apply_to(task);
        }
    }
}

/// Runs a store call under the optional request timeout.
async fn bounded<T>(
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(StoreError::Timeout)),
        None => call.await,
    }
}
