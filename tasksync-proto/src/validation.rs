//! Field validation rules shared by the client and the store.
//!
//! All checks are pure and synchronous. Lengths are counted in characters
//! (Unicode scalar values), not bytes.

use thiserror::Error;

/// Minimum title length in characters.
pub const MIN_TITLE_LENGTH: usize = 3;

/// Maximum title length in characters.
pub const MAX_TITLE_LENGTH: usize = 250;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// Maximum number of tags on a task.
pub const MAX_TAGS: usize = 15;

/// Minimum tag length in characters.
pub const MIN_TAG_LENGTH: usize = 3;

/// Maximum tag length in characters.
pub const MAX_TAG_LENGTH: usize = 50;

/// How far in the past (milliseconds) a due date may lie: one day.
pub const DUE_DATE_GRACE_MS: u64 = 24 * 60 * 60 * 1000;

/// A field value rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The title is empty.
    #[error("title cannot be empty")]
    EmptyTitle,
    /// The title is shorter than 3 or longer than 250 characters.
    #[error("title must be between 3 and 250 characters (got {0})")]
    TitleLengthOutOfRange(usize),
    /// The description is longer than 1000 characters.
    #[error("description must be at most 1000 characters (got {0})")]
    DescriptionTooLong(usize),
    /// More than 15 tags.
    #[error("a task can have at most 15 tags (got {0})")]
    TooManyTags(usize),
    /// A tag is shorter than 3 or longer than 50 characters.
    #[error("tag {0:?} must be between 3 and 50 characters")]
    TagLengthOutOfRange(String),
    /// The due date lies more than a day in the past.
    #[error("due date must not be in the past")]
    DueDateInPast,
}

/// Checks a title against the length bounds.
///
/// # Errors
///
/// [`ValidationError::EmptyTitle`] for an empty title,
/// [`ValidationError::TitleLengthOutOfRange`] outside 3..=250 characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let len = title.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyTitle);
    }
    if !(MIN_TITLE_LENGTH..=MAX_TITLE_LENGTH).contains(&len) {
        return Err(ValidationError::TitleLengthOutOfRange(len));
    }
    Ok(())
}

/// Checks a description against the maximum length.
///
/// # Errors
///
/// [`ValidationError::DescriptionTooLong`] above 1000 characters.
pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_LENGTH {
        return Err(ValidationError::DescriptionTooLong(len));
    }
    Ok(())
}

/// Checks the tag count and each tag's length.
///
/// # Errors
///
/// [`ValidationError::TooManyTags`] or [`ValidationError::TagLengthOutOfRange`].
pub fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags(tags.len()));
    }
    if let Some(bad) = tags
        .iter()
        .find(|t| !(MIN_TAG_LENGTH..=MAX_TAG_LENGTH).contains(&t.chars().count()))
    {
        return Err(ValidationError::TagLengthOutOfRange(bad.clone()));
    }
    Ok(())
}

/// Checks that a due date is no earlier than one day before `now_ms`.
///
/// # Errors
///
/// [`ValidationError::DueDateInPast`].
pub const fn validate_due_date(due_ms: u64, now_ms: u64) -> Result<(), ValidationError> {
    if due_ms < now_ms.saturating_sub(DUE_DATE_GRACE_MS) {
        return Err(ValidationError::DueDateInPast);
    }
    Ok(())
}
