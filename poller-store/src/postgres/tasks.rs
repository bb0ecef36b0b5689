//! Task operations against Postgres

use async_trait::async_trait;
use poller_core::protocol::{TASKS, task_state};
use poller_core::{Task, TaskError, TaskState, now_millis};

use super::PgStore;
use crate::error::{Result, StoreError};
use crate::repository::TaskRepository;

const TASK_COLUMNS: &str = "uuid, name, runner_id, workflow_id, flow_id, step_id, state, \
     created, updated, error, task_list_name, data_type, data";

#[async_trait]
impl TaskRepository for PgStore {
    async fn claim_task(&self, names: &[String], task_list: &str) -> Result<Option<Task>> {
        // One statement: the locked subquery picks the row and the update
        // flips it, so two pollers can never both see it as pending.
        let sql = format!(
            r#"
            UPDATE {TASKS}
            SET state = $3, updated = $4
            WHERE state = $5 AND uuid = (
                SELECT t.uuid
                FROM {TASKS} t
                WHERE t.state = $5
                  AND t.name = ANY($1)
                  AND t.task_list_name = $2
                  AND NOT EXISTS (
                      SELECT 1 FROM {TASKS} r
                      WHERE r.step_id = t.step_id AND r.state = $3
                  )
                ORDER BY t.created
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(names)
            .bind(task_list)
            .bind(task_state::RUNNING)
            .bind(now_millis())
            .bind(task_state::PENDING)
            .fetch_optional(self.pool())
            .await;

        match row {
            Ok(Some(row)) => Ok(Some(row.try_into()?)),
            Ok(None) => Ok(None),
            // Another poller started a task for the same step between our
            // snapshot and our update; the partial unique index rejected us.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::debug!("Claim lost a race on the running-step index");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_task_completed(&self, task: &Task) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {TASKS} SET state = $1, updated = $2 WHERE uuid = $3 AND state = $4"
        ))
        .bind(task_state::COMPLETED)
        .bind(now_millis())
        .bind(&task.id)
        .bind(task_state::RUNNING)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn mark_task_failed(&self, task: &Task, message: &str) -> Result<()> {
        let error = serde_json::to_value(TaskError {
            message: message.to_string(),
        })?;

        sqlx::query(&format!(
            "UPDATE {TASKS} SET state = $1, updated = $2, error = $3 WHERE uuid = $4 AND state = $5"
        ))
        .bind(task_state::FAILED)
        .bind(now_millis())
        .bind(error)
        .bind(&task.id)
        .bind(task_state::RUNNING)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn insert_resume_task(
        &self,
        step_id: &str,
        workflow_id: &str,
        task_list: &str,
    ) -> Result<Task> {
        let task = Task::resume(step_id, workflow_id, task_list);

        sqlx::query(&format!(
            r#"
            INSERT INTO {TASKS} ({TASK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        ))
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.runner_id)
        .bind(&task.workflow_id)
        .bind(&task.flow_id)
        .bind(&task.step_id)
        .bind(task.state.as_str())
        .bind(task.created)
        .bind(task.updated)
        .bind(Option::<serde_json::Value>::None)
        .bind(&task.task_list_name)
        .bind(&task.data_type)
        .bind(&task.data)
        .execute(self.pool())
        .await?;

        Ok(task)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    uuid: String,
    name: String,
    runner_id: String,
    workflow_id: String,
    flow_id: String,
    step_id: String,
    state: String,
    created: i64,
    updated: i64,
    error: Option<serde_json::Value>,
    task_list_name: String,
    data_type: Option<String>,
    data: Option<serde_json::Value>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let state = row
            .state
            .parse::<TaskState>()
            .map_err(StoreError::InvalidDocument)?;
        let error = row
            .error
            .map(serde_json::from_value::<TaskError>)
            .transpose()?;

        Ok(Task {
            id: row.uuid,
            name: row.name,
            runner_id: row.runner_id,
            workflow_id: row.workflow_id,
            flow_id: row.flow_id,
            step_id: row.step_id,
            state,
            created: row.created,
            updated: row.updated,
            error,
            task_list_name: row.task_list_name,
            data_type: row.data_type,
            data: row.data,
        })
    }
}
