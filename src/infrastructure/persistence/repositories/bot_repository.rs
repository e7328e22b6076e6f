use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use crate::domain::bot::{Bot, BotStatus, StrategyKind};
use crate::domain::repositories::BotRepository;
use crate::infrastructure::persistence::Database;

pub struct SqliteBotRepository {
    database: Database,
}

impl SqliteBotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn status_str(status: BotStatus) -> &'static str {
    match status {
        BotStatus::Stopped => "STOPPED",
        BotStatus::Starting => "STARTING",
        BotStatus::Running => "RUNNING",
        BotStatus::Paused => "PAUSED",
        BotStatus::Stopping => "STOPPING",
        BotStatus::Error => "ERROR",
    }
}

fn parse_status(raw: &str) -> BotStatus {
    match raw {
        "STARTING" => BotStatus::Starting,
        "RUNNING" => BotStatus::Running,
        "PAUSED" => BotStatus::Paused,
        "STOPPING" => BotStatus::Stopping,
        "ERROR" => BotStatus::Error,
        _ => BotStatus::Stopped,
    }
}

fn row_to_bot(row: &sqlx::sqlite::SqliteRow) -> Result<Bot> {
    let strategy: String = row.try_get("strategy")?;
    let status: String = row.try_get("status")?;
    let realized_pnl: String = row.try_get("realized_pnl")?;
    let unrealized_pnl: String = row.try_get("unrealized_pnl")?;
    let strategy_state_json: Option<String> = row.try_get("strategy_state_json")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let config_json: String = row.try_get("config_json")?;

    Ok(Bot {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        credential_id: row.try_get("credential_id")?,
        strategy: StrategyKind::from_str(&strategy).context("invalid strategy kind in row")?,
        symbol: row.try_get("symbol")?,
        config_json: serde_json::from_str(&config_json).context("invalid config_json")?,
        status: parse_status(&status),
        realized_pnl: Decimal::from_str(&realized_pnl).unwrap_or_default(),
        unrealized_pnl: Decimal::from_str(&unrealized_pnl).unwrap_or_default(),
        strategy_state_json: strategy_state_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("invalid strategy_state_json")?,
        error_message: row.try_get("error_message")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

#[async_trait]
impl BotRepository for SqliteBotRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Bot>> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to load bot")?;
        row.as_ref().map(row_to_bot).transpose()
    }

    async fn find_by_status(&self, status: BotStatus) -> Result<Vec<Bot>> {
        let rows = sqlx::query("SELECT * FROM bots WHERE status = $1")
            .bind(status_str(status))
            .fetch_all(&self.database.pool)
            .await
            .context("failed to list bots by status")?;
        rows.iter().map(row_to_bot).collect()
    }

    async fn save(&self, bot: &Bot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bots (
                id, user_id, credential_id, strategy, symbol, config_json, status,
                realized_pnl, unrealized_pnl, strategy_state_json, error_message,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT(id) DO UPDATE SET
                credential_id = excluded.credential_id,
                strategy = excluded.strategy,
                symbol = excluded.symbol,
                config_json = excluded.config_json,
                status = excluded.status,
                realized_pnl = excluded.realized_pnl,
                unrealized_pnl = excluded.unrealized_pnl,
                strategy_state_json = excluded.strategy_state_json,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&bot.id)
        .bind(&bot.user_id)
        .bind(&bot.credential_id)
        .bind(bot.strategy.as_str())
        .bind(&bot.symbol)
        .bind(bot.config_json.to_string())
        .bind(status_str(bot.status))
        .bind(bot.realized_pnl.to_string())
        .bind(bot.unrealized_pnl.to_string())
        .bind(bot.strategy_state_json.as_ref().map(|v| v.to_string()))
        .bind(&bot.error_message)
        .bind(bot.created_at.to_rfc3339())
        .bind(bot.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("failed to save bot")?;
        Ok(())
    }

    async fn update_status(&self, id: &str, status: BotStatus, error_message: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE bots SET status = $1, error_message = $2, updated_at = $3 WHERE id = $4")
            .bind(status_str(status))
            .bind(error_message)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("failed to update bot status")?;
        Ok(())
    }

    async fn add_realized_pnl(&self, id: &str, delta: Decimal) -> Result<()> {
        let row = sqlx::query("SELECT realized_pnl FROM bots WHERE id = $1")
            .bind(id)
            .fetch_one(&self.database.pool)
            .await
            .context("failed to load realized_pnl")?;
        let current: String = row.try_get("realized_pnl")?;
        let next = Decimal::from_str(&current).unwrap_or_default() + delta;

        sqlx::query("UPDATE bots SET realized_pnl = $1, updated_at = $2 WHERE id = $3")
            .bind(next.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("failed to persist realized_pnl")?;
        Ok(())
    }

    async fn update_unrealized_pnl(&self, id: &str, unrealized_pnl: Decimal) -> Result<()> {
        sqlx::query("UPDATE bots SET unrealized_pnl = $1, updated_at = $2 WHERE id = $3")
            .bind(unrealized_pnl.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("failed to persist unrealized_pnl")?;
        Ok(())
    }

    async fn save_strategy_state(&self, id: &str, state: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE bots SET strategy_state_json = $1, updated_at = $2 WHERE id = $3")
            .bind(state.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.database.pool)
            .await
            .context("failed to persist strategy state")?;
        Ok(())
    }
}
