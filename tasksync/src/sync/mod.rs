//! Optimistic synchronization engine.
//!
//! Local edits are validated, shown immediately, and sent to the task store
//! after a per-field settle delay. Store responses are merged back without
//! clobbering newer local edits, and the task collection is kept consistent
//! with every create, update and delete.
//!
//! - [`debounce`] coalesces repeated calls per key.
//! - [`patch`] builds partial-update payloads.
//! - [`collection`] owns the canonical task map and the selection.
//! - [`controller`] ties them together around the selected task.

pub mod collection;
pub mod controller;
pub mod debounce;
pub mod patch;

use std::fmt;

use tasksync_proto::task::{Task, TaskId, TaskPriority, TaskStatus};
use tasksync_proto::validation::{
    ValidationError, validate_description, validate_due_date, validate_tags, validate_title,
};

use crate::store::StoreError;

pub use collection::{CollectionError, Projection, TaskCollection};
pub use controller::{SyncConfig, SyncController, SyncEvent, SyncEvents};
pub use debounce::Debouncer;
pub use patch::{Patch, build_patch};

/// An independently patchable task field.
///
/// Each field is its own debounce and request scope: edits to different
/// fields never coalesce or wait on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Title,
    Status,
    Priority,
    DueDate,
    Description,
    Tags,
}

impl Field {
    /// Every field, in display order.
    pub const ALL: [Self; 6] = [
        Self::Title,
        Self::Status,
        Self::Priority,
        Self::DueDate,
        Self::Description,
        Self::Tags,
    ];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::DueDate => "due date",
            Self::Description => "description",
            Self::Tags => "tags",
        };
        f.write_str(name)
    }
}

/// A new value for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Title(String),
    Status(TaskStatus),
    Priority(TaskPriority),
    /// `None` clears the due date.
    DueDate(Option<u64>),
    Description(String),
    Tags(Vec<String>),
}

impl FieldValue {
    /// Reads the current value of `field` from a task.
    #[must_use]
    pub fn of(task: &Task, field: Field) -> Self {
        match field {
            Field::Title => Self::Title(task.title.clone()),
            Field::Status => Self::Status(task.status),
            Field::Priority => Self::Priority(task.priority),
            Field::DueDate => Self::DueDate(task.due_date),
            Field::Description => Self::Description(task.description.clone()),
            Field::Tags => Self::Tags(task.tags.clone()),
        }
    }

    /// The field this value belongs to.
    #[must_use]
    pub const fn field(&self) -> Field {
        match self {
            Self::Title(_) => Field::Title,
            Self::Status(_) => Field::Status,
            Self::Priority(_) => Field::Priority,
            Self::DueDate(_) => Field::DueDate,
            Self::Description(_) => Field::Description,
            Self::Tags(_) => Field::Tags,
        }
    }

    /// Checks the value against the field's local rules.
    ///
    /// `now_ms` anchors the due-date check.
    ///
    /// # Errors
    ///
    /// Returns the first rule the value violates.
    pub fn validate(&self, now_ms: u64) -> Result<(), ValidationError> {
        match self {
            Self::Title(title) => validate_title(title),
            Self::Description(description) => validate_description(description),
            Self::Tags(tags) => validate_tags(tags),
            Self::DueDate(Some(due)) => validate_due_date(*due, now_ms),
            Self::DueDate(None) | Self::Status(_) | Self::Priority(_) => Ok(()),
        }
    }

    /// Writes the value into `task`.
    pub fn apply_to(&self, task: &mut Task) {
        match self {
            Self::Title(title) => task.title.clone_from(title),
            Self::Status(status) => task.status = *status,
            Self::Priority(priority) => task.priority = *priority,
            Self::DueDate(due) => task.due_date = *due,
            Self::Description(description) => task.description.clone_from(description),
            Self::Tags(tags) => task.tags.clone_from(tags),
        }
    }
}

/// Copies `field` from `source` into `target`.
pub fn copy_field(target: &mut Task, source: &Task, field: Field) {
    FieldValue::of(source, field).apply_to(target);
}

/// Broad category of an error surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A local rule rejected the edit; nothing was sent.
    Validation,
    /// The store no longer has the task.
    NotFound,
    /// The store call failed or timed out.
    Store,
}

/// The most recent error for the selected task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// The field whose request failed, when the error belongs to one.
    pub field: Option<Field>,
    pub message: String,
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing notification produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub(crate) fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Errors returned by [`SyncController`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The value failed local validation and was not sent.
    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),

    /// The task does not exist (locally or in the store).
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The operation needs a selected task.
    #[error("no task selected")]
    NoSelection,
}

impl SyncError {
    /// The user-facing category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NoSelection => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: TaskId::new("t1"),
            title: "Buy milk".to_string(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Low,
            due_date: None,
            description: String::new(),
            tags: vec![],
            created_at: 1,
            modified_at: 1,
        }
    }

    #[test]
    fn read_then_apply_is_identity() {
        let original = task();
        let mut copy = task();
        copy.title = "Something else".to_string();
        copy.priority = TaskPriority::High;
        for field in Field::ALL {
            copy_field(&mut copy, &original, field);
        }
        assert_eq!(copy, original);
    }

    #[test]
    fn value_knows_its_field() {
        for field in Field::ALL {
            assert_eq!(FieldValue::of(&task(), field).field(), field);
        }
    }

    #[test]
    fn validate_dispatches_per_field() {
        assert_eq!(
            FieldValue::Title("ab".to_string()).validate(0),
            Err(ValidationError::TitleLengthOutOfRange(2))
        );
        assert!(FieldValue::Status(TaskStatus::Done).validate(0).is_ok());
        assert!(FieldValue::DueDate(None).validate(u64::MAX).is_ok());
        assert!(
            FieldValue::Tags(vec!["ok".to_string()])
                .validate(0)
                .is_err()
        );
    }

    #[test]
    fn sync_error_kinds() {
        assert_eq!(
            SyncError::from(ValidationError::EmptyTitle).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SyncError::NotFound(TaskId::new("x")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(SyncError::from(StoreError::Timeout).kind(), ErrorKind::Store);
    }
}
