//! In-memory task book: the store's service semantics.
//!
//! [`TaskBook`] validates requests, assigns identifiers and timestamps,
//! and applies partial updates. Omitted fields of an update are left
//! untouched. Tasks are listed in creation order.

use std::collections::HashMap;

use tasksync_proto::rpc::{RemoteError, StoreCall, StoreReply};
use tasksync_proto::task::{Task, TaskId, TaskStatus, dedup_tags, now_ms};
use tasksync_proto::validation::{
    validate_description, validate_due_date, validate_tags, validate_title,
};
use tasksync_proto::{CreateTaskRequest, UpdateTaskRequest};

/// Task storage plus the validation the store enforces on every write.
#[derive(Debug, Default)]
pub struct TaskBook {
    tasks: HashMap<TaskId, Task>,
    /// Creation order of the ids in `tasks`.
    order: Vec<TaskId>,
}

impl TaskBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no tasks are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Dispatches a wire-level call to the matching operation.
    ///
    /// # Errors
    ///
    /// Propagates the operation's [`RemoteError`].
    pub fn execute(&mut self, call: StoreCall) -> Result<StoreReply, RemoteError> {
        match call {
            StoreCall::CreateTask(req) => self.create(req).map(StoreReply::Task),
            StoreCall::UpdateTask(req) => self.update(req).map(StoreReply::Task),
            StoreCall::DeleteTask(id) => self.delete(&id).map(|()| StoreReply::Deleted),
            StoreCall::GetAllTasks => Ok(StoreReply::Tasks(Some(self.all()))),
            StoreCall::GetTaskById(id) => self.get(&id).map(StoreReply::Task),
        }
    }

    /// Creates a task in the `Todo` state.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` if the title or due date fails validation.
    pub fn create(&mut self, req: CreateTaskRequest) -> Result<Task, RemoteError> {
        let now = now_ms();
        validate_title(&req.title).map_err(|e| RemoteError::invalid(format!("title: {e}")))?;
        if let Some(due) = req.due_date {
            validate_due_date(due, now)
                .map_err(|e| RemoteError::invalid(format!("due_date: {e}")))?;
        }

        let task = Task {
            id: TaskId::generate(),
            title: req.title,
            status: TaskStatus::Todo,
            priority: req.priority,
            due_date: req.due_date,
            description: String::new(),
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
        };
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Applies a partial update and returns the stored result.
    ///
    /// The request is validated in full before anything is written, so a
    /// rejected update leaves the task unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidArguments` if any supplied
    /// field fails validation.
    pub fn update(&mut self, req: UpdateTaskRequest) -> Result<Task, RemoteError> {
        let now = now_ms();
        if !self.tasks.contains_key(&req.id) {
            return Err(RemoteError::not_found(&req.id));
        }
        if let Some(title) = &req.title {
            validate_title(title).map_err(|e| RemoteError::invalid(format!("title: {e}")))?;
        }
        if let Some(description) = &req.description {
            validate_description(description)
                .map_err(|e| RemoteError::invalid(format!("description: {e}")))?;
        }
        if let Some(Some(due)) = req.due_date {
            validate_due_date(due, now)
                .map_err(|e| RemoteError::invalid(format!("due_date: {e}")))?;
        }
        let tags = req.tags.map(dedup_tags);
        if let Some(tags) = &tags {
            validate_tags(tags).map_err(|e| RemoteError::invalid(format!("tags: {e}")))?;
        }

        let task = self
            .tasks
            .get_mut(&req.id)
            .ok_or_else(|| RemoteError::not_found(&req.id))?;
        if let Some(title) = req.title {
            task.title = title;
        }
        if let Some(status) = req.status {
            task.status = status;
        }
        if let Some(priority) = req.priority {
            task.priority = priority;
        }
        if let Some(due_date) = req.due_date {
            task.due_date = due_date;
        }
        if let Some(description) = req.description {
            task.description = description;
        }
        if let Some(tags) = tags {
            task.tags = tags;
        }
        // Strictly increasing even when two writes land in the same millisecond.
        task.modified_at = now.max(task.modified_at + 1);
        Ok(task.clone())
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn delete(&mut self, id: &TaskId) -> Result<(), RemoteError> {
        if self.tasks.remove(id).is_none() {
            return Err(RemoteError::not_found(id));
        }
        self.order.retain(|o| o != id);
        Ok(())
    }

    /// Returns one task.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: &TaskId) -> Result<Task, RemoteError> {
        self.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(id))
    }

    /// Returns every task in creation order.
    #[must_use]
    pub fn all(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}
