use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::repositories::RiskStateRepository;
use crate::domain::risk::RiskState;
use crate::infrastructure::persistence::Database;

pub struct SqliteRiskStateRepository {
    database: Database,
}

impl SqliteRiskStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RiskStateRepository for SqliteRiskStateRepository {
    async fn load(&self, bot_id: &str) -> Result<Option<RiskState>> {
        let row = sqlx::query("SELECT state_json FROM risk_state WHERE bot_id = $1")
            .bind(bot_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to load risk state")?;
        match row {
            Some(row) => {
                let state_json: String = row.try_get("state_json")?;
                Ok(Some(serde_json::from_str(&state_json).context("invalid risk state json")?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, bot_id: &str, state: &RiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_state (bot_id, state_json, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(bot_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(bot_id)
        .bind(serde_json::to_string(state).context("failed to serialize risk state")?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("failed to save risk state")?;
        Ok(())
    }

    async fn record_event(&self, bot_id: &str, action: &str, reason: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO risk_events (bot_id, action, reason, at) VALUES ($1, $2, $3, $4)")
            .bind(bot_id)
            .bind(action)
            .bind(reason)
            .bind(at.to_rfc3339())
            .execute(&self.database.pool)
            .await
            .context("failed to record risk event")?;
        Ok(())
    }
}
