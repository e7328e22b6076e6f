//! Repository-pattern abstractions over the persistence substrate.
//!
//! Core logic depends on these traits, never on `sqlx` directly; the
//! concrete SQLite-backed implementations live under
//! `infrastructure::persistence`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::bot::{Bot, BotStatus};
use crate::domain::order::{ManagedOrder, OrderState};
use crate::domain::risk::RiskState;
use crate::domain::trading::types::{ExchangeTrade, OrderSide};

#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Bot>>;
    async fn find_by_status(&self, status: BotStatus) -> Result<Vec<Bot>>;
    async fn save(&self, bot: &Bot) -> Result<()>;
    async fn update_status(&self, id: &str, status: BotStatus, error_message: Option<&str>) -> Result<()>;
    async fn add_realized_pnl(&self, id: &str, delta: Decimal) -> Result<()>;
    async fn update_unrealized_pnl(&self, id: &str, unrealized_pnl: Decimal) -> Result<()>;
    async fn save_strategy_state(&self, id: &str, state: &serde_json::Value) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &ManagedOrder) -> Result<()>;
    async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<ManagedOrder>>;
    async fn find_by_exchange_id(&self, bot_id: &str, exchange_order_id: &str) -> Result<Option<ManagedOrder>>;
    async fn find_non_terminal(&self, bot_id: &str) -> Result<Vec<ManagedOrder>>;
    async fn has_active_grid_order(&self, bot_id: &str, side: OrderSide, grid_level: i32) -> Result<bool>;
    async fn update_state(&self, id: uuid::Uuid, state: OrderState) -> Result<()>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(&self, bot_id: &str, trade: &ExchangeTrade, order_id: Option<uuid::Uuid>, realized_pnl: Option<Decimal>) -> Result<()>;
    async fn exists_by_exchange_trade_id(&self, exchange_trade_id: &str) -> Result<bool>;
    /// Fallback dedup key for a trade recorded from a fill event before its
    /// `exchange_trade_id` was known: matches on the exchange order id plus
    /// price and quantity instead.
    async fn exists_by_order_price_quantity(&self, order_exchange_id: &str, price: Decimal, quantity: Decimal) -> Result<bool>;
    async fn find_recent(&self, bot_id: &str, limit: u32) -> Result<Vec<ExchangeTrade>>;
}

#[async_trait]
pub trait RiskStateRepository: Send + Sync {
    async fn load(&self, bot_id: &str) -> Result<Option<RiskState>>;
    async fn save(&self, bot_id: &str, state: &RiskState) -> Result<()>;
    async fn record_event(&self, bot_id: &str, action: &str, reason: Option<&str>, at: DateTime<Utc>) -> Result<()>;
}

/// Lifecycle log for a bot's supervisor/engine-level events (start, stop, error).
/// Distinct from `RiskStateRepository::record_event`, which logs risk *decisions*.
#[async_trait]
pub trait BotEventRepository: Send + Sync {
    async fn record(&self, bot_id: &str, kind: &str, message: &str) -> Result<()>;
}
