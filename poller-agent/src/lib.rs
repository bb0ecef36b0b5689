//! Agent poller
//!
//! Runs registered handlers against tasks claimed from a shared store.
//!
//! Architecture:
//! - Configuration: identity, task list, intervals and concurrency budget
//! - Handlers: named async functions from input params to return values
//! - Registration: the server record other services discover pollers by
//! - Scheduler: poll loop, heartbeat loop and the per-task pipeline
//!
//! A processed task writes its handler's returns onto the blocked step and
//! enqueues a resume task so the workflow engine picks the step back up.

pub mod config;
pub mod error;
pub mod handler;
pub mod registration;
pub mod scheduler;

pub use config::AgentPollerConfig;
pub use error::{PollerError, Result};
pub use handler::{Handler, HandlerRegistry, async_handler_fn, handler_fn};
pub use registration::ServerRegistration;
pub use scheduler::{AgentPoller, PollerState, TaskOutcome};
