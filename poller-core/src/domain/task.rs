//! Task domain types

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::protocol::{RESUME_DATA_TYPE, RESUME_TASK_NAME, task_state};

/// A claimable unit of external work tied to one blocked step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "uuid")]
    pub id: String,
    /// Handler key, optionally qualified as `ns.Name`
    pub name: String,
    #[serde(default)]
    pub runner_id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub flow_id: String,
    pub step_id: String,
    pub state: TaskState,
    /// Epoch millis
    pub created: i64,
    /// Epoch millis
    pub updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Routing partition; pollers only claim tasks from their own list
    pub task_list_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Task {
    /// Creates a pending task with a fresh id
    pub fn new(
        name: impl Into<String>,
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        task_list_name: impl Into<String>,
    ) -> Self {
        let now = crate::now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            runner_id: String::new(),
            workflow_id: workflow_id.into(),
            flow_id: String::new(),
            step_id: step_id.into(),
            state: TaskState::Pending,
            created: now,
            updated: now,
            error: None,
            task_list_name: task_list_name.into(),
            data_type: None,
            data: None,
        }
    }

    /// Creates the pending task that tells the engine a step's returns are ready
    pub fn resume(step_id: &str, workflow_id: &str, task_list_name: &str) -> Self {
        let mut task = Self::new(RESUME_TASK_NAME, workflow_id, step_id, task_list_name);
        task.data_type = Some(RESUME_DATA_TYPE.to_string());
        task.data = Some(json!({
            "step_id": step_id,
            "workflow_id": workflow_id,
        }));
        task
    }

    /// Returns true once the task can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TaskState::Completed | TaskState::Failed | TaskState::Ignored | TaskState::Canceled
        )
    }
}

/// Error recorded on a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Ignored,
    Canceled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => task_state::PENDING,
            TaskState::Running => task_state::RUNNING,
            TaskState::Completed => task_state::COMPLETED,
            TaskState::Failed => task_state::FAILED,
            TaskState::Ignored => task_state::IGNORED,
            TaskState::Canceled => task_state::CANCELED,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            task_state::PENDING => Ok(TaskState::Pending),
            task_state::RUNNING => Ok(TaskState::Running),
            task_state::COMPLETED => Ok(TaskState::Completed),
            task_state::FAILED => Ok(TaskState::Failed),
            task_state::IGNORED => Ok(TaskState::Ignored),
            task_state::CANCELED => Ok(TaskState::Canceled),
            other => Err(format!("unknown task state: {}", other)),
        }
    }
}
