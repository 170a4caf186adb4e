//! tasksync store library.
//!
//! An in-memory task store ([`book::TaskBook`]) served over a WebSocket
//! RPC endpoint ([`server`]). Exposed for tests and for embedding the
//! store inside the client process.

pub mod book;
pub mod config;
pub mod server;
