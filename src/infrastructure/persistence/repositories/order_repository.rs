use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::order::{ManagedOrder, OrderState};
use crate::domain::repositories::OrderRepository;
use crate::domain::trading::types::{OrderSide, OrderType};
use crate::infrastructure::persistence::Database;

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn parse_side(raw: &str) -> OrderSide {
    if raw == "SELL" {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn type_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
    }
}

fn parse_type(raw: &str) -> OrderType {
    if raw == "LIMIT" {
        OrderType::Limit
    } else {
        OrderType::Market
    }
}

fn state_str(state: OrderState) -> &'static str {
    state.as_str()
}

fn parse_state(raw: &str) -> OrderState {
    match raw {
        "SUBMITTING" => OrderState::Submitting,
        "OPEN" => OrderState::Open,
        "PARTIAL" => OrderState::Partial,
        "FILLED" => OrderState::Filled,
        "CANCELLING" => OrderState::Cancelling,
        "CANCELLED" => OrderState::Cancelled,
        "REJECTED" => OrderState::Rejected,
        "ERROR" => OrderState::Error,
        _ => OrderState::Pending,
    }
}

fn opt_decimal(raw: Option<String>) -> Option<Decimal> {
    raw.and_then(|s| Decimal::from_str(&s).ok())
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<ManagedOrder> {
    let id: String = row.try_get("id")?;
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let price: Option<String> = row.try_get("price")?;
    let quantity: String = row.try_get("quantity")?;
    let filled_quantity: String = row.try_get("filled_quantity")?;
    let average_fill_price: Option<String> = row.try_get("average_fill_price")?;
    let fee: Option<String> = row.try_get("fee")?;
    let state: String = row.try_get("state")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ManagedOrder {
        id: Uuid::parse_str(&id).context("invalid order id")?,
        bot_id: row.try_get("bot_id")?,
        client_order_id: row.try_get("client_order_id")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        symbol: row.try_get("symbol")?,
        side: parse_side(&side),
        order_type: parse_type(&order_type),
        price: opt_decimal(price),
        quantity: Decimal::from_str(&quantity).unwrap_or_default(),
        filled_quantity: Decimal::from_str(&filled_quantity).unwrap_or_default(),
        average_fill_price: opt_decimal(average_fill_price),
        fee: opt_decimal(fee),
        fee_asset: row.try_get("fee_asset")?,
        state: parse_state(&state),
        grid_level: row.try_get("grid_level")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        last_error: row.try_get("last_error")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn save(&self, order: &ManagedOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, bot_id, client_order_id, exchange_order_id, symbol, side, order_type,
                price, quantity, filled_quantity, average_fill_price, fee, fee_asset,
                state, grid_level, retry_count, last_error, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            ON CONFLICT(id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                price = excluded.price,
                filled_quantity = excluded.filled_quantity,
                average_fill_price = excluded.average_fill_price,
                fee = excluded.fee,
                fee_asset = excluded.fee_asset,
                state = excluded.state,
                retry_count = excluded.retry_count,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(order.id.to_string())
        .bind(&order.bot_id)
        .bind(&order.client_order_id)
        .bind(&order.exchange_order_id)
        .bind(&order.symbol)
        .bind(side_str(order.side))
        .bind(type_str(order.order_type))
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.quantity.to_string())
        .bind(order.filled_quantity.to_string())
        .bind(order.average_fill_price.map(|p| p.to_string()))
        .bind(order.fee.map(|f| f.to_string()))
        .bind(&order.fee_asset)
        .bind(state_str(order.state))
        .bind(order.grid_level)
        .bind(order.retry_count as i64)
        .bind(&order.last_error)
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("failed to save order")?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ManagedOrder>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to load order")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_exchange_id(&self, bot_id: &str, exchange_order_id: &str) -> Result<Option<ManagedOrder>> {
        let row = sqlx::query("SELECT * FROM orders WHERE bot_id = $1 AND exchange_order_id = $2")
            .bind(bot_id)
            .bind(exchange_order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to load order by exchange id")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_non_terminal(&self, bot_id: &str) -> Result<Vec<ManagedOrder>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE bot_id = $1 AND state NOT IN ('FILLED', 'CANCELLED', 'REJECTED', 'ERROR')",
        )
        .bind(bot_id)
        .fetch_all(&self.database.pool)
        .await
        .context("failed to list non-terminal orders")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn has_active_grid_order(&self, bot_id: &str, side: OrderSide, grid_level: i32) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM orders
            WHERE bot_id = $1 AND side = $2 AND grid_level = $3
            AND state NOT IN ('FILLED', 'CANCELLED', 'REJECTED', 'ERROR')
            "#,
        )
        .bind(bot_id)
        .bind(side_str(side))
        .bind(grid_level)
        .fetch_one(&self.database.pool)
        .await
        .context("failed to check active grid order")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn update_state(&self, id: Uuid, state: OrderState) -> Result<()> {
        sqlx::query("UPDATE orders SET state = $1, updated_at = $2 WHERE id = $3")
            .bind(state_str(state))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.database.pool)
            .await
            .context("failed to update order state")?;
        Ok(())
    }
}
