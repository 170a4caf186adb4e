//! Partial-update payloads.
//!
//! A [`Patch`] names a task and carries only the fields that changed.
//! Fields left out of a patch are left untouched by the store. Patches can
//! only be produced by [`build_patch`].

use tasksync_proto::UpdateTaskRequest;
use tasksync_proto::task::{TaskId, TaskPriority, TaskStatus, dedup_tags};

use super::{Field, FieldValue};

/// A minimal partial update for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    id: TaskId,
    title: Option<String>,
    status: Option<TaskStatus>,
    priority: Option<TaskPriority>,
    due_date: Option<Option<u64>>,
    description: Option<String>,
    tags: Option<Vec<String>>,
}

/// Builds a patch for `task_id` from the changed field values.
///
/// Later values for the same field replace earlier ones. Tags are sent as
/// the complete resulting set with duplicates removed.
pub fn build_patch(task_id: &TaskId, changed: impl IntoIterator<Item = FieldValue>) -> Patch {
    let mut patch = Patch {
        id: task_id.clone(),
        title: None,
        status: None,
        priority: None,
        due_date: None,
        description: None,
        tags: None,
    };
    for value in changed {
        match value {
            FieldValue::Title(title) => patch.title = Some(title),
            FieldValue::Status(status) => patch.status = Some(status),
            FieldValue::Priority(priority) => patch.priority = Some(priority),
            FieldValue::DueDate(due) => patch.due_date = Some(due),
            FieldValue::Description(description) => patch.description = Some(description),
            FieldValue::Tags(tags) => patch.tags = Some(dedup_tags(tags)),
        }
    }
    patch
}

impl Patch {
    /// The task this patch applies to.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// The fields carried by this patch.
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        let present = [
            (Field::Title, self.title.is_some()),
            (Field::Status, self.status.is_some()),
            (Field::Priority, self.priority.is_some()),
            (Field::DueDate, self.due_date.is_some()),
            (Field::Description, self.description.is_some()),
            (Field::Tags, self.tags.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Converts the patch into the wire request.
    #[must_use]
    pub fn into_request(self) -> UpdateTaskRequest {
        UpdateTaskRequest {
            id: self.id,
            title: self.title,
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            description: self.description,
            tags: self.tags,
        }
    }
}

/// The tag set after adding `tag` to `current`.
///
/// Returns `None` if the tag is blank or already present, in which case
/// there is nothing to send.
#[must_use]
pub fn tags_with(current: &[String], tag: &str) -> Option<Vec<String>> {
    let tag = tag.trim();
    if tag.is_empty() || current.iter().any(|t| t == tag) {
        return None;
    }
    let mut tags = current.to_vec();
    tags.push(tag.to_string());
    Some(tags)
}

/// The tag set after removing `tag` from `current`.
///
/// Returns `None` if the tag is not present.
#[must_use]
pub fn tags_without(current: &[String], tag: &str) -> Option<Vec<String>> {
    let tag = tag.trim();
    if !current.iter().any(|t| t == tag) {
        return None;
    }
    Some(current.iter().filter(|t| *t != tag).cloned().collect())
}
