//! Protocol constants
//!
//! These strings are a wire format shared with the workflow engine and with
//! pollers written in other languages. Changing any of them breaks
//! interoperability with existing stores.

/// Table holding step documents
pub const STEPS: &str = "steps";

/// Table holding task documents
pub const TASKS: &str = "tasks";

/// Table holding server documents
pub const SERVERS: &str = "servers";

/// Task state values
pub mod task_state {
    pub const PENDING: &str = "pending";
    pub const RUNNING: &str = "running";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const IGNORED: &str = "ignored";
    pub const CANCELED: &str = "canceled";
}

/// Server state values
pub mod server_state {
    pub const STARTUP: &str = "startup";
    pub const RUNNING: &str = "running";
    pub const SHUTDOWN: &str = "shutdown";
    pub const ERROR: &str = "error";
}

/// Step state values the poller reads or filters on
pub mod step_state {
    /// A step blocked on external work, the only state in which returns
    /// may be written
    pub const EVENT_TRANSMIT: &str = "state.facet.execution.EventTransmit";
}

/// Reserved name of the task that asks the engine to resume a step
pub const RESUME_TASK_NAME: &str = "afl:resume";

/// `data_type` tag carried by resume tasks
pub const RESUME_DATA_TYPE: &str = "resume";

/// Task list used when none is configured
pub const DEFAULT_TASK_LIST: &str = "default";

/// Separator between namespace and short name in qualified task names
pub const NAMESPACE_SEPARATOR: char = '.';

/// Message recorded on tasks whose name matches no registered handler
pub const NO_HANDLER_MESSAGE: &str = "no handler registered";
