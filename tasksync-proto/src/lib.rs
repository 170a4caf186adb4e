//! Shared definitions for tasksync: the task model, request payloads,
//! field validation rules and the store RPC wire format.

pub mod request;
pub mod rpc;
pub mod task;
pub mod validation;

pub use request::{CreateTaskRequest, UpdateTaskRequest};
pub use task::{Task, TaskId, TaskPriority, TaskStatus};
pub use validation::ValidationError;
