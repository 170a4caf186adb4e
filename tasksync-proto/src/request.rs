//! Request payloads accepted by the task store.

use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskPriority, TaskStatus};

/// Payload for creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    /// Title of the new task.
    pub title: String,
    /// Initial priority.
    pub priority: TaskPriority,
    /// Optional due date (milliseconds since epoch).
    pub due_date: Option<u64>,
}

impl CreateTaskRequest {
    /// Creates a request with no due date.
    pub fn new(title: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            title: title.into(),
            priority,
            due_date: None,
        }
    }

    /// Sets the due date.
    #[must_use]
    pub const fn with_due_date(mut self, due_date: u64) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Partial update of a task.
///
/// Every field except `id` is optional; `None` leaves the stored value
/// untouched. `due_date` is doubly optional so that `Some(None)` clears
/// the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    /// Task being updated.
    pub id: TaskId,
    /// New title.
    pub title: Option<String>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<TaskPriority>,
    /// New due date, or `Some(None)` to clear it.
    pub due_date: Option<Option<u64>>,
    /// New description.
    pub description: Option<String>,
    /// Replacement tag set (the store has no per-tag operations).
    pub tags: Option<Vec<String>>,
}

impl UpdateTaskRequest {
    /// Returns `true` if the request changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.description.is_none()
            && self.tags.is_none()
    }
}
