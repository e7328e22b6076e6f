use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::repositories::TradeRepository;
use crate::domain::trading::types::{ExchangeTrade, Fee, OrderSide};
use crate::infrastructure::persistence::Database;

pub struct SqliteTradeRepository {
    database: Database,
}

impl SqliteTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> Result<ExchangeTrade> {
    let side: String = row.try_get("side")?;
    let price: String = row.try_get("price")?;
    let quantity: String = row.try_get("quantity")?;
    let fee_cost: Option<String> = row.try_get("fee_cost")?;
    let fee_currency: Option<String> = row.try_get("fee_currency")?;

    let fee = match (fee_cost, fee_currency) {
        (Some(cost), Some(currency)) => Some(Fee {
            cost: Decimal::from_str(&cost).unwrap_or_default(),
            currency,
        }),
        _ => None,
    };

    Ok(ExchangeTrade {
        exchange_trade_id: row.try_get("exchange_trade_id")?,
        order_exchange_id: row.try_get("order_exchange_id")?,
        side: if side == "SELL" { OrderSide::Sell } else { OrderSide::Buy },
        price: Decimal::from_str(&price).unwrap_or_default(),
        quantity: Decimal::from_str(&quantity).unwrap_or_default(),
        fee,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn insert(
        &self,
        bot_id: &str,
        trade: &ExchangeTrade,
        order_id: Option<Uuid>,
        realized_pnl: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                bot_id, order_id, exchange_trade_id, order_exchange_id, side, price,
                quantity, fee_cost, fee_currency, realized_pnl, timestamp
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            ON CONFLICT(exchange_trade_id) DO NOTHING
            "#,
        )
        .bind(bot_id)
        .bind(order_id.map(|id| id.to_string()))
        .bind(&trade.exchange_trade_id)
        .bind(&trade.order_exchange_id)
        .bind(if trade.side == OrderSide::Sell { "SELL" } else { "BUY" })
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.fee.as_ref().map(|f| f.cost.to_string()))
        .bind(trade.fee.as_ref().map(|f| f.currency.clone()))
        .bind(realized_pnl.map(|p| p.to_string()))
        .bind(trade.timestamp)
        .execute(&self.database.pool)
        .await
        .context("failed to insert trade")?;
        Ok(())
    }

    async fn exists_by_exchange_trade_id(&self, exchange_trade_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM trades WHERE exchange_trade_id = $1")
            .bind(exchange_trade_id)
            .fetch_one(&self.database.pool)
            .await
            .context("failed to check trade existence")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn exists_by_order_price_quantity(&self, order_exchange_id: &str, price: Decimal, quantity: Decimal) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM trades WHERE order_exchange_id = $1 AND price = $2 AND quantity = $3",
        )
        .bind(order_exchange_id)
        .bind(price.to_string())
        .bind(quantity.to_string())
        .fetch_one(&self.database.pool)
        .await
        .context("failed to check trade existence by order/price/quantity")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn find_recent(&self, bot_id: &str, limit: u32) -> Result<Vec<ExchangeTrade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE bot_id = $1 ORDER BY timestamp DESC LIMIT $2")
            .bind(bot_id)
            .bind(limit as i64)
            .fetch_all(&self.database.pool)
            .await
            .context("failed to list recent trades")?;
        rows.iter().map(row_to_trade).collect()
    }
}
