//! Step operations against Postgres

use async_trait::async_trait;
use poller_core::domain::step::returns_from;
use poller_core::protocol::{STEPS, step_state};
use poller_core::{Params, StepAttributes};

use super::PgStore;
use crate::error::{Result, StoreError};
use crate::repository::StepRepository;

#[async_trait]
impl StepRepository for PgStore {
    async fn read_step_params(&self, step_id: &str) -> Result<Params> {
        let row: Option<(Option<serde_json::Value>,)> =
            sqlx::query_as(&format!("SELECT attributes FROM {STEPS} WHERE uuid = $1"))
                .bind(step_id)
                .fetch_optional(self.pool())
                .await?;

        let (attributes,) = row.ok_or_else(|| StoreError::not_found("step", step_id))?;

        let attributes = match attributes {
            Some(value) => serde_json::from_value::<StepAttributes>(value)?,
            None => StepAttributes::default(),
        };

        Ok(attributes
            .params
            .into_iter()
            .map(|(name, attr)| (name, attr.value))
            .collect())
    }

    async fn write_step_returns(&self, step_id: &str, returns: &Params) -> Result<u64> {
        let entries = serde_json::to_value(returns_from(returns))?;

        // Merge into attributes.returns only while the step still waits
        let result = sqlx::query(&format!(
            r#"
            UPDATE {STEPS}
            SET attributes = jsonb_set(
                COALESCE(attributes, '{{}}'::jsonb),
                '{{returns}}',
                COALESCE(attributes -> 'returns', '{{}}'::jsonb) || $2
            )
            WHERE uuid = $1 AND state = $3
            "#
        ))
        .bind(step_id)
        .bind(entries)
        .bind(step_state::EVENT_TRANSMIT)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
