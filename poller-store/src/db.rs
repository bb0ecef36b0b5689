//! Postgres pool and schema
//!
//! The workflow engine normally owns the schema; `run_migrations` is
//! idempotent so a poller can also bootstrap an empty database.

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use poller_core::protocol::{SERVERS, STEPS, TASKS, task_state};

/// Creates a pool that connects on first use
pub fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {TASKS} (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            runner_id TEXT NOT NULL DEFAULT '',
            workflow_id TEXT NOT NULL,
            flow_id TEXT NOT NULL DEFAULT '',
            step_id TEXT NOT NULL,
            state TEXT NOT NULL,
            created BIGINT NOT NULL,
            updated BIGINT NOT NULL,
            error JSONB,
            task_list_name TEXT NOT NULL,
            data_type TEXT,
            data JSONB
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {STEPS} (
            uuid TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL,
            state TEXT NOT NULL,
            attributes JSONB NOT NULL DEFAULT '{{}}'
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {SERVERS} (
            uuid TEXT PRIMARY KEY,
            server_group TEXT NOT NULL,
            service_name TEXT NOT NULL,
            server_name TEXT NOT NULL,
            server_ips TEXT[] NOT NULL DEFAULT '{{}}',
            start_time BIGINT NOT NULL,
            ping_time BIGINT NOT NULL,
            topics TEXT[] NOT NULL DEFAULT '{{}}',
            handlers TEXT[] NOT NULL DEFAULT '{{}}',
            handled JSONB,
            state TEXT NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    // Claim lookups
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_tasks_claim ON {TASKS}(state, task_list_name, name, created)"
    ))
    .execute(pool)
    .await?;

    // At most one running task per step
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_running_step ON {TASKS}(step_id) WHERE state = '{}'",
        task_state::RUNNING
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_servers_ping_time ON {SERVERS}(ping_time)"
    ))
    .execute(pool)
    .await?;

    tracing::info!("Store migrations completed successfully");
    Ok(())
}
