//! Single-task pipeline
//!
//! Strings the store operations together for one claimed task. Steps run
//! strictly in order and the first failure marks the task failed; nothing
//! here returns an error to the caller.

use poller_core::{Params, Task};
use poller_store::{StoreError, Store};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::stats::HandledStats;
use crate::handler::{Handler, HandlerRegistry};

/// Reason a task was marked failed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no handler registered")]
    NoHandler,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0:#}")]
    Handler(anyhow::Error),

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

/// How a processed task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Marked failed with this message
    Failed(String),
}

/// Processes claimed tasks
#[derive(Clone)]
pub struct TaskPipeline {
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    stats: HandledStats,
}

impl TaskPipeline {
    pub fn new(store: Arc<dyn Store>, registry: HandlerRegistry, stats: HandledStats) -> Self {
        Self {
            store,
            registry,
            stats,
        }
    }

    /// Runs the pipeline for a claimed task and records the outcome on it
    pub async fn process(&self, task: Task) -> TaskOutcome {
        info!("Processing task {} ({})", task.id, task.name);

        // Counters are keyed by the name the handler is registered under
        let (handler_name, handler) = match self.registry.resolve(&task.name) {
            Some((name, handler)) => (name, Some(handler)),
            None => (task.name.clone(), None),
        };

        match self.run(&task, handler).await {
            Ok(()) => {
                self.stats.record(&handler_name, true);

                // The handler's effects and the resume task are already
                // committed; a failed completion write is only logged.
                match self.store.mark_task_completed(&task).await {
                    Ok(()) => info!("Task {} completed", task.id),
                    Err(e) => error!(
                        "Task {} succeeded but could not be marked completed: {:#}",
                        task.id, e
                    ),
                }
                TaskOutcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                self.stats.record(&handler_name, false);
                warn!("Task {} failed: {}", task.id, message);

                if let Err(mark_err) = self.store.mark_task_failed(&task, &message).await {
                    error!("Failed to mark task {} failed: {:#}", task.id, mark_err);
                }
                TaskOutcome::Failed(message)
            }
        }
    }

    async fn run(
        &self,
        task: &Task,
        handler: Option<Arc<dyn Handler>>,
    ) -> Result<(), PipelineError> {
        let handler = handler.ok_or(PipelineError::NoHandler)?;

        let params = self.store.read_step_params(&task.step_id).await?;

        let returns = invoke(handler, params).await?;

        if !returns.is_empty() {
            let modified = self
                .store
                .write_step_returns(&task.step_id, &returns)
                .await?;

            if modified == 0 {
                debug!(
                    "Step {} no longer awaits a result, returns not written",
                    task.step_id
                );
            }
        }

        let resume = self
            .store
            .insert_resume_task(&task.step_id, &task.workflow_id, &task.task_list_name)
            .await?;
        debug!("Inserted resume task {} for step {}", resume.id, task.step_id);

        Ok(())
    }
}

/// Runs the handler on its own tokio task so a panic fails the task
/// instead of unwinding into the caller
async fn invoke(handler: Arc<dyn Handler>, params: Params) -> Result<Params, PipelineError> {
    match tokio::spawn(async move { handler.invoke(params).await }).await {
        Ok(result) => result.map_err(PipelineError::Handler),
        Err(e) if e.is_panic() => Err(PipelineError::HandlerPanicked(panic_message(
            e.into_panic(),
        ))),
        Err(e) => Err(PipelineError::Handler(anyhow::Error::new(e))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
