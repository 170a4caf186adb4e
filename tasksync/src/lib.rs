//! tasksync client library: the optimistic synchronization engine, the
//! task store boundary, configuration and the interactive shell.

pub mod config;
pub mod shell;
pub mod store;
pub mod sync;
