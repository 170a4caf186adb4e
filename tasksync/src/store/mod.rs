//! Task store boundary.
//!
//! Defines the [`TaskStore`] trait that every backing store must satisfy.
//! Concrete implementations:
//! - [`embedded::EmbeddedStore`]: in-process store for offline use and tests
//! - [`remote::RemoteStore`]: WebSocket RPC client for `tasksync-store`

pub mod embedded;
pub mod remote;

use std::future::Future;

use tasksync_proto::rpc::{RemoteError, RemoteErrorKind, StoreReply};
use tasksync_proto::{CreateTaskRequest, Task, TaskId, UpdateTaskRequest};

pub use embedded::EmbeddedStore;
pub use remote::RemoteStore;

/// Errors that can occur during store calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The task does not exist in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store rejected the request's arguments.
    #[error("rejected by store: {0}")]
    Validation(String),

    /// Any other store-side failure.
    #[error("store failure: {0}")]
    Store(String),

    /// The call did not complete within the request timeout.
    #[error("store call timed out")]
    Timeout,

    /// The connection to the store was lost before a response arrived.
    #[error("connection to store lost")]
    Disconnected,

    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// Transport-level failure.
    #[error("store I/O error: {0}")]
    Io(String),
}

impl From<RemoteError> for StoreError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::NotFound => Self::NotFound(err.message),
            RemoteErrorKind::InvalidArguments => Self::Validation(err.message),
            RemoteErrorKind::Internal => Self::Store(err.message),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Async request/response access to the authoritative task records.
///
/// Calls may complete in any order relative to each other. Callers that
/// need ordering must wait for one call before issuing the next.
pub trait TaskStore: Send + Sync + 'static {
    /// Creates a task and returns it with its store-assigned id and
    /// timestamps.
    fn create_task(
        &self,
        req: CreateTaskRequest,
    ) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Applies a partial update and returns the stored task.
    fn update_task(
        &self,
        req: UpdateTaskRequest,
    ) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Deletes a task.
    fn delete_task(&self, id: &TaskId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetches every task.
    ///
    /// `Ok(None)` means the store has nothing new to report; callers must
    /// keep their local state rather than clearing it.
    fn get_all_tasks(&self) -> impl Future<Output = Result<Option<Vec<Task>>, StoreError>> + Send;

    /// Fetches one task.
    fn get_task_by_id(&self, id: &TaskId) -> impl Future<Output = Result<Task, StoreError>> + Send;
}

/// Extracts a task from a reply.
pub(crate) fn reply_task(reply: StoreReply) -> Result<Task, StoreError> {
    match reply {
        StoreReply::Task(task) => Ok(task),
        other => Err(StoreError::Store(format!("unexpected reply: {other:?}"))),
    }
}

/// Extracts a task listing from a reply.
pub(crate) fn reply_tasks(reply: StoreReply) -> Result<Option<Vec<Task>>, StoreError> {
    match reply {
        StoreReply::Tasks(tasks) => Ok(tasks),
        other => Err(StoreError::Store(format!("unexpected reply: {other:?}"))),
    }
}

/// Checks a delete acknowledgment.
pub(crate) fn reply_deleted(reply: StoreReply) -> Result<(), StoreError> {
    match reply {
        StoreReply::Deleted => Ok(()),
        other => Err(StoreError::Store(format!("unexpected reply: {other:?}"))),
    }
}
