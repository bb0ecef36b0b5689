//! Poller Core
//!
//! Shared vocabulary and document shapes for the agent poller protocol.
//!
//! This crate contains:
//! - Protocol constants: table names, states and reserved task names
//! - Domain types: the Task, Step and Server documents as stored
//! - Type hints: the tag written next to every step return value

pub mod domain;
pub mod protocol;

pub use domain::server::{HandledCount, Server, ServerState};
pub use domain::step::{Attribute, Step, StepAttributes};
pub use domain::task::{Task, TaskError, TaskState};
pub use domain::type_hint::TypeHint;

/// Parameter or return values keyed by attribute name
pub type Params = std::collections::HashMap<String, serde_json::Value>;

/// Current time in epoch milliseconds, the timestamp unit of every document
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
