//! Server record operations against Postgres

use async_trait::async_trait;
use poller_core::protocol::SERVERS;
use poller_core::{HandledCount, Server};

use super::PgStore;
use crate::error::Result;
use crate::repository::{ServerRepository, ServerStateUpdate};

#[async_trait]
impl ServerRepository for PgStore {
    async fn upsert_server(&self, server: &Server) -> Result<()> {
        let handled = server
            .handled
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {SERVERS} (uuid, server_group, service_name, server_name, server_ips,
                                   start_time, ping_time, topics, handlers, handled, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (uuid) DO UPDATE SET
                server_group = EXCLUDED.server_group,
                service_name = EXCLUDED.service_name,
                server_name = EXCLUDED.server_name,
                server_ips = EXCLUDED.server_ips,
                start_time = EXCLUDED.start_time,
                ping_time = EXCLUDED.ping_time,
                topics = EXCLUDED.topics,
                handlers = EXCLUDED.handlers,
                handled = EXCLUDED.handled,
                state = EXCLUDED.state
            "#
        ))
        .bind(&server.id)
        .bind(&server.server_group)
        .bind(&server.service_name)
        .bind(&server.server_name)
        .bind(&server.server_ips)
        .bind(server.start_time)
        .bind(server.ping_time)
        .bind(&server.topics)
        .bind(&server.handlers)
        .bind(handled)
        .bind(server.state.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn touch_server(&self, server_id: &str, ping_time: i64) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {SERVERS} SET ping_time = $1 WHERE uuid = $2"
        ))
        .bind(ping_time)
        .bind(server_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn set_server_state(&self, server_id: &str, update: ServerStateUpdate) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {SERVERS} SET state = $1, ping_time = $2 WHERE uuid = $3"
        ))
        .bind(update.state.as_str())
        .bind(update.ping_time)
        .bind(server_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn update_handled(&self, server_id: &str, handled: &[HandledCount]) -> Result<()> {
        let handled = serde_json::to_value(handled)?;

        sqlx::query(&format!(
            "UPDATE {SERVERS} SET handled = $1 WHERE uuid = $2"
        ))
        .bind(handled)
        .bind(server_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
