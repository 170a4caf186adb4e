//! Store RPC wire protocol.
//!
//! Each WebSocket binary message carries exactly one postcard-encoded
//! [`RpcFrame`]. Clients send [`RpcFrame::Request`]; the store answers
//! with [`RpcFrame::Response`] carrying the same `call_id`. Responses are
//! not guaranteed to arrive in request order.

use serde::{Deserialize, Serialize};

use crate::request::{CreateTaskRequest, UpdateTaskRequest};
use crate::task::{Task, TaskId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One remote store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreCall {
    /// Create a task.
    CreateTask(CreateTaskRequest),
    /// Partially update a task.
    UpdateTask(UpdateTaskRequest),
    /// Delete a task.
    DeleteTask(TaskId),
    /// Fetch every task.
    GetAllTasks,
    /// Fetch one task.
    GetTaskById(TaskId),
}

impl StoreCall {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateTask(_) => "CreateTask",
            Self::UpdateTask(_) => "UpdateTask",
            Self::DeleteTask(_) => "DeleteTask",
            Self::GetAllTasks => "GetAllTasks",
            Self::GetTaskById(_) => "GetTaskByID",
        }
    }
}

/// Successful result of a [`StoreCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreReply {
    /// The created, updated or fetched task.
    Task(Task),
    /// All tasks; `None` means the store had nothing to report.
    Tasks(Option<Vec<Task>>),
    /// The task was deleted.
    Deleted,
}

/// Category of a store-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// The task does not exist.
    NotFound,
    /// The request failed validation.
    InvalidArguments,
    /// Any other store failure.
    Internal,
}

/// Failure reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    /// Failure category.
    pub kind: RemoteErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl RemoteError {
    /// Creates a `NotFound` error for the given task.
    #[must_use]
    pub fn not_found(id: &TaskId) -> Self {
        Self {
            kind: RemoteErrorKind::NotFound,
            message: format!("task not found: {id}"),
        }
    }

    /// Creates an `InvalidArguments` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::InvalidArguments,
            message: message.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Internal,
            message: message.into(),
        }
    }
}

/// A single message on the RPC connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcFrame {
    /// Client to store.
    Request {
        /// Correlates the response with this request.
        call_id: u64,
        /// The operation to perform.
        call: StoreCall,
    },
    /// Store to client.
    Response {
        /// `call_id` of the request being answered.
        call_id: u64,
        /// Result of the operation.
        outcome: Result<StoreReply, RemoteError>,
    },
}

/// Encodes an [`RpcFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &RpcFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`RpcFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<RpcFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskStatus};

    fn make_task() -> Task {
        Task {
            id: TaskId::new("task-1"),
            title: "Buy milk".to_string(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Low,
            due_date: Some(1_700_000_000_000),
            description: String::new(),
            tags: vec!["errand".to_string()],
            created_at: 1000,
            modified_at: 1000,
        }
    }

    #[test]
    fn request_frame_round_trip() {
        let frame = RpcFrame::Request {
            call_id: 7,
            call: StoreCall::UpdateTask(UpdateTaskRequest {
                id: TaskId::new("task-1"),
                title: Some("Buy milk and eggs".to_string()),
                due_date: Some(None),
                ..Default::default()
            }),
        };
        let bytes = encode(&frame).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), frame);
    }

    #[test]
    fn response_frame_carries_error() {
        let frame = RpcFrame::Response {
            call_id: 3,
            outcome: Err(RemoteError::not_found(&TaskId::new("gone"))),
        };
        let bytes = encode(&frame).expect("encode");
        let RpcFrame::Response { call_id, outcome } = decode(&bytes).expect("decode") else {
            panic!("expected response");
        };
        assert_eq!(call_id, 3);
        let err = outcome.expect_err("should be an error");
        assert_eq!(err.kind, RemoteErrorKind::NotFound);
        assert!(err.message.contains("gone"));
    }

    #[test]
    fn null_task_list_survives_encoding() {
        let frame = RpcFrame::Response {
            call_id: 1,
            outcome: Ok(StoreReply::Tasks(None)),
        };
        let bytes = encode(&frame).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), frame);

        let frame = RpcFrame::Response {
            call_id: 2,
            outcome: Ok(StoreReply::Tasks(Some(vec![make_task()]))),
        };
        let bytes = encode(&frame).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), frame);
    }

    #[test]
    fn call_names_match_store_operations() {
        assert_eq!(StoreCall::GetAllTasks.name(), "GetAllTasks");
        assert_eq!(
            StoreCall::GetTaskById(TaskId::new("x")).name(),
            "GetTaskByID"
        );
    }

    #[test]
    fn decode_corrupted_bytes_fails() {
        assert!(decode(&[0xFF, 0xFE, 0xFD, 0xFC]).is_err());
        assert!(decode(&[]).is_err());
    }
}
