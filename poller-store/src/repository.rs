//! Repository traits
//!
//! The only seam through which the poller touches the shared store. Every
//! operation is a single atomic statement against one document, so callers
//! may retry any of them without corrupting state.
//!
//! All repositories are trait-based so the Postgres and in-memory backends
//! are interchangeable.

use async_trait::async_trait;
use poller_core::{HandledCount, Params, Server, Task};

use crate::error::Result;

/// Task lifecycle operations
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Atomically claims one pending task
    ///
    /// Flips a task from pending to running when its name is one of
    /// `names`, its task list is `task_list` and no other task for the same
    /// step is running. Returns the task as it is after the transition, or
    /// `None` when nothing is eligible.
    async fn claim_task(&self, names: &[String], task_list: &str) -> Result<Option<Task>>;

    /// Marks a running task completed. A no-op for tasks no longer running.
    async fn mark_task_completed(&self, task: &Task) -> Result<()>;

    /// Marks a running task failed with `message`. A no-op for tasks no
    /// longer running.
    async fn mark_task_failed(&self, task: &Task, message: &str) -> Result<()>;

    /// Inserts a pending resume task for the given step
    async fn insert_resume_task(
        &self,
        step_id: &str,
        workflow_id: &str,
        task_list: &str,
    ) -> Result<Task>;
}

/// Step attribute operations
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Reads the parameter values of a step
    ///
    /// Fails with `NotFound` when the step does not exist.
    async fn read_step_params(&self, step_id: &str) -> Result<Params>;

    /// Writes return values into a step waiting on an external result
    ///
    /// Returns the number of documents modified. Zero means the step has
    /// moved on (or does not exist) and is not an error.
    async fn write_step_returns(&self, step_id: &str, returns: &Params) -> Result<u64>;
}

/// Server record operations
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Inserts or replaces the server record with the same id
    async fn upsert_server(&self, server: &Server) -> Result<()>;

    /// Updates only the ping time
    async fn touch_server(&self, server_id: &str, ping_time: i64) -> Result<()>;

    /// Sets the server state and ping time, leaving the rest intact
    async fn set_server_state(&self, server_id: &str, update: ServerStateUpdate) -> Result<()>;

    /// Replaces the per-handler counters
    async fn update_handled(&self, server_id: &str, handled: &[HandledCount]) -> Result<()>;
}

/// State transition applied by `ServerRepository::set_server_state`
#[derive(Debug, Clone, Copy)]
pub struct ServerStateUpdate {
    pub state: poller_core::ServerState,
    pub ping_time: i64,
}

/// A complete store backend with a connection lifecycle
#[async_trait]
pub trait Store: TaskRepository + StepRepository + ServerRepository {
    /// Establishes (or verifies) the connection to the store
    async fn connect(&self) -> Result<()>;

    /// Releases the connection
    async fn close(&self);
}
