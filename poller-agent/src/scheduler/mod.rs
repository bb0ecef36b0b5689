//! Scheduler layer for the agent
//!
//! This layer claims tasks from the store and dispatches them to handlers
//! under a bounded concurrency budget, while keeping the server record
//! alive. It manages the lifecycle of a task from claim to completion.

pub mod pipeline;
pub mod poller;
pub mod stats;

pub use pipeline::{PipelineError, TaskOutcome, TaskPipeline};
pub use poller::{AgentPoller, PollerState};
pub use stats::HandledStats;
