use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_core::domain::bot::{Bot, BotStatus};
use gridbot_core::domain::order::{ManagedOrder, OrderState};
use gridbot_core::domain::repositories::{BotEventRepository, BotRepository, OrderRepository, RiskStateRepository, TradeRepository};
use gridbot_core::domain::risk::RiskState;
use gridbot_core::domain::trading::types::{ExchangeTrade, OrderSide};
use rust_decimal::Decimal;
use uuid::Uuid;

/// In-process stand-in for the sqlite-backed order table, good enough to
/// drive the order manager's state machine through its transitions without
/// a real database connection.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<Uuid, ManagedOrder>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &ManagedOrder) -> anyhow::Result<()> {
        self.orders.lock().unwrap().insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ManagedOrder>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_exchange_id(&self, bot_id: &str, exchange_order_id: &str) -> anyhow::Result<Option<ManagedOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.bot_id == bot_id && o.exchange_order_id.as_deref() == Some(exchange_order_id))
            .cloned())
    }

    async fn find_non_terminal(&self, bot_id: &str) -> anyhow::Result<Vec<ManagedOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.bot_id == bot_id && o.is_active())
            .cloned()
            .collect())
    }

    async fn has_active_grid_order(&self, bot_id: &str, side: OrderSide, grid_level: i32) -> anyhow::Result<bool> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .any(|o| o.bot_id == bot_id && o.side == side && o.grid_level == Some(grid_level) && o.is_active()))
    }

    async fn update_state(&self, id: Uuid, state: OrderState) -> anyhow::Result<()> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&id) {
            order.state = state;
        }
        Ok(())
    }
}

/// In-process stand-in for the bots table.
#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: Mutex<HashMap<String, Bot>>,
}

impl InMemoryBotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bot: Bot) {
        self.bots.lock().unwrap().insert(bot.id.clone(), bot);
    }
}

#[async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Bot>> {
        Ok(self.bots.lock().unwrap().get(id).cloned())
    }

    async fn find_by_status(&self, status: BotStatus) -> anyhow::Result<Vec<Bot>> {
        Ok(self.bots.lock().unwrap().values().filter(|b| b.status == status).cloned().collect())
    }

    async fn save(&self, bot: &Bot) -> anyhow::Result<()> {
        self.bots.lock().unwrap().insert(bot.id.clone(), bot.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, status: BotStatus, error_message: Option<&str>) -> anyhow::Result<()> {
        if let Some(bot) = self.bots.lock().unwrap().get_mut(id) {
            bot.status = status;
            bot.error_message = error_message.map(String::from);
        }
        Ok(())
    }

    async fn add_realized_pnl(&self, id: &str, delta: Decimal) -> anyhow::Result<()> {
        if let Some(bot) = self.bots.lock().unwrap().get_mut(id) {
            bot.realized_pnl += delta;
        }
        Ok(())
    }

    async fn update_unrealized_pnl(&self, id: &str, unrealized_pnl: Decimal) -> anyhow::Result<()> {
        if let Some(bot) = self.bots.lock().unwrap().get_mut(id) {
            bot.unrealized_pnl = unrealized_pnl;
        }
        Ok(())
    }

    async fn save_strategy_state(&self, id: &str, state: &serde_json::Value) -> anyhow::Result<()> {
        if let Some(bot) = self.bots.lock().unwrap().get_mut(id) {
            bot.strategy_state_json = Some(state.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRiskStateRepository {
    states: Mutex<HashMap<String, RiskState>>,
}

impl InMemoryRiskStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStateRepository for InMemoryRiskStateRepository {
    async fn load(&self, bot_id: &str) -> anyhow::Result<Option<RiskState>> {
        Ok(self.states.lock().unwrap().get(bot_id).cloned())
    }

    async fn save(&self, bot_id: &str, state: &RiskState) -> anyhow::Result<()> {
        self.states.lock().unwrap().insert(bot_id.to_string(), state.clone());
        Ok(())
    }

    async fn record_event(&self, _bot_id: &str, _action: &str, _reason: Option<&str>, _at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: Mutex<Vec<ExchangeTrade>>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn insert(&self, _bot_id: &str, trade: &ExchangeTrade, _order_id: Option<Uuid>, _realized_pnl: Option<Decimal>) -> anyhow::Result<()> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    async fn exists_by_exchange_trade_id(&self, exchange_trade_id: &str) -> anyhow::Result<bool> {
        Ok(self.trades.lock().unwrap().iter().any(|t| t.exchange_trade_id == exchange_trade_id))
    }

    async fn exists_by_order_price_quantity(&self, order_exchange_id: &str, price: Decimal, quantity: Decimal) -> anyhow::Result<bool> {
        Ok(self.trades.lock().unwrap().iter().any(|t| {
            t.order_exchange_id.as_deref() == Some(order_exchange_id) && t.price == price && t.quantity == quantity
        }))
    }

    async fn find_recent(&self, _bot_id: &str, limit: u32) -> anyhow::Result<Vec<ExchangeTrade>> {
        let trades = self.trades.lock().unwrap();
        Ok(trades.iter().rev().take(limit as usize).cloned().collect())
    }
}

/// In-process stand-in for the bot_events table.
#[derive(Default)]
pub struct InMemoryBotEventRepository {
    events: Mutex<Vec<(String, String, String)>>,
}

impl InMemoryBotEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, bot_id: &str) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, _, _)| b == bot_id)
            .map(|(_, kind, message)| (kind.clone(), message.clone()))
            .collect()
    }
}

#[async_trait]
impl BotEventRepository for InMemoryBotEventRepository {
    async fn record(&self, bot_id: &str, kind: &str, message: &str) -> anyhow::Result<()> {
        self.events.lock().unwrap().push((bot_id.to_string(), kind.to_string(), message.to_string()));
        Ok(())
    }
}

pub fn sample_bot(id: &str, strategy: gridbot_core::domain::bot::StrategyKind, config_json: serde_json::Value) -> Bot {
    let now = Utc::now();
    Bot {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        credential_id: "cred-1".to_string(),
        strategy,
        symbol: "BTC/USDT".to_string(),
        config_json,
        status: BotStatus::Running,
        realized_pnl: Decimal::ZERO,
        unrealized_pnl: Decimal::ZERO,
        strategy_state_json: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}
