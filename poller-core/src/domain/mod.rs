//! Domain types
//!
//! Documents shared between the workflow engine (which owns them) and the
//! poller (which reads and writes a narrow slice of them).

pub mod server;
pub mod step;
pub mod task;
pub mod type_hint;
