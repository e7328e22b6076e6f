use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::repositories::BotEventRepository;
use crate::infrastructure::persistence::Database;

pub struct SqliteBotEventRepository {
    database: Database,
}

impl SqliteBotEventRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl BotEventRepository for SqliteBotEventRepository {
    async fn record(&self, bot_id: &str, kind: &str, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO bot_events (bot_id, kind, message, created_at) VALUES ($1, $2, $3, $4)")
            .bind(bot_id)
            .bind(kind)
            .bind(message)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.database.pool)
            .await
            .context("failed to record bot event")?;
        Ok(())
    }
}
