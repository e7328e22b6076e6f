use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::bot::ExchangeCredential;
use crate::domain::errors::TransportError;
use crate::domain::trading::types::{Balance, Candle, ExchangeTrade, MarketMetadata, OrderSide, OrderType, Ticker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    Open,
    Closed,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct ExchangeOrderAck {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
}

#[derive(Debug, Clone)]
pub struct ExchangeOrderSnapshot {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
}

/// Polymorphic boundary over venues. One instance per credential.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, TransportError>;

    async fn fetch_balance(&self) -> Result<Balance, TransportError>;

    async fn market_metadata(&self, symbol: &str) -> Result<MarketMetadata, TransportError>;

    /// Rejects a limit order submitted without a price.
    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        client_order_id: &str,
    ) -> Result<ExchangeOrderAck, TransportError>;

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<bool, TransportError>;

    async fn fetch_order(
        &self,
        exchange_order_id: &str,
        symbol: &str,
    ) -> Result<ExchangeOrderSnapshot, TransportError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, TransportError>;

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<ExchangeTrade>, TransportError>;
}

#[derive(Debug, Clone)]
pub enum UserDataEvent {
    OrderUpdate {
        exchange_order_id: String,
        status: ExchangeOrderStatus,
        filled_quantity: Decimal,
        average_fill_price: Option<Decimal>,
        fee: Option<Decimal>,
        fee_asset: Option<String>,
    },
    BalanceUpdate(Balance),
}

/// Per-venue authenticated private WebSocket handler. Implementors own
/// reconnect-with-backoff; callers just register a callback and read events
/// off the channel it feeds.
#[async_trait]
pub trait UserDataStream: Send + Sync {
    async fn run(&self, sink: tokio::sync::mpsc::Sender<UserDataEvent>) -> Result<(), TransportError>;
}

/// Abstraction over the circuit breaker's backing key-value store. Only the
/// circuit breaker writes these keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn incr(&self, key: &str, ttl_seconds: Option<u64>) -> anyhow::Result<u64>;
    async fn incrbyfloat(&self, key: &str, amount: Decimal, ttl_seconds: Option<u64>) -> anyhow::Result<Decimal>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Pluggable outbound messaging hook. Resolution happens once at startup;
/// when no notifier is configured a no-op implementation is installed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_order_filled(&self, user_id: &str, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal);
    async fn notify_error(&self, user_id: &str, message: &str);
}

/// Resolves a bot's `credential_id` to already-decrypted key material. The
/// credential store itself (encryption at rest, rotation, CRUD) lives
/// outside this core; implementations just answer "what does this id mean".
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> anyhow::Result<ExchangeCredential>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_order_filled(
        &self,
        _user_id: &str,
        _symbol: &str,
        _side: OrderSide,
        _quantity: Decimal,
        _price: Decimal,
    ) {
    }

    async fn notify_error(&self, _user_id: &str, _message: &str) {}
}
