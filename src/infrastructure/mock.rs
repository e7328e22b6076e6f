use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc::Sender, Mutex};

use crate::domain::errors::TransportError;
use crate::domain::ports::{
    ExchangeAdapter, ExchangeOrderAck, ExchangeOrderSnapshot, ExchangeOrderStatus, UserDataEvent, UserDataStream,
};
use crate::domain::trading::types::{Balance, Candle, ExchangeTrade, MarketMetadata, OrderSide, OrderType, Ticker};

struct MockOrder {
    status: ExchangeOrderStatus,
    filled_quantity: Decimal,
    price: Decimal,
}

/// In-memory venue used by integration tests and the demo bootstrap. Prices
/// and balances are set directly by the test; orders fill immediately at the
/// configured ticker price unless `reject_next_order` is set.
pub struct MockExchangeAdapter {
    ticker: Mutex<Ticker>,
    balance: Mutex<Balance>,
    metadata: Mutex<MarketMetadata>,
    orders: Mutex<HashMap<String, MockOrder>>,
    next_id: AtomicI64,
    reject_next_order: Mutex<bool>,
}

impl MockExchangeAdapter {
    pub fn new() -> Self {
        Self {
            ticker: Mutex::new(Ticker {
                last: Decimal::ONE,
                bid: Decimal::ONE,
                ask: Decimal::ONE,
            }),
            balance: Mutex::new(Balance::default()),
            metadata: Mutex::new(MarketMetadata {
                min_notional: Decimal::ZERO,
                min_qty: Decimal::ZERO,
                step_size: Decimal::ZERO,
            }),
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            reject_next_order: Mutex::new(false),
        }
    }

    pub async fn set_ticker(&self, ticker: Ticker) {
        *self.ticker.lock().await = ticker;
    }

    pub async fn set_balance(&self, balance: Balance) {
        *self.balance.lock().await = balance;
    }

    pub async fn set_metadata(&self, metadata: MarketMetadata) {
        *self.metadata.lock().await = metadata;
    }

    pub async fn reject_next_order(&self) {
        *self.reject_next_order.lock().await = true;
    }
}

impl Default for MockExchangeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, TransportError> {
        Ok(*self.ticker.lock().await)
    }

    async fn fetch_balance(&self) -> Result<Balance, TransportError> {
        Ok(self.balance.lock().await.clone())
    }

    async fn market_metadata(&self, _symbol: &str) -> Result<MarketMetadata, TransportError> {
        Ok(*self.metadata.lock().await)
    }

    async fn create_order(
        &self,
        _symbol: &str,
        _side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        _client_order_id: &str,
    ) -> Result<ExchangeOrderAck, TransportError> {
        {
            let mut reject = self.reject_next_order.lock().await;
            if *reject {
                *reject = false;
                return Err(TransportError::Rejected("mock adapter was told to reject this order".to_string()));
            }
        }

        let fill_price = match order_type {
            OrderType::Market => self.ticker.lock().await.last,
            OrderType::Limit => price.ok_or_else(|| TransportError::Rejected("limit order missing price".to_string()))?,
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.orders.lock().await.insert(
            id.clone(),
            MockOrder {
                status: ExchangeOrderStatus::Closed,
                filled_quantity: quantity,
                price: fill_price,
            },
        );

        Ok(ExchangeOrderAck {
            exchange_order_id: id,
            status: ExchangeOrderStatus::Closed,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<bool, TransportError> {
        let mut orders = self.orders.lock().await;
        if let Some(order) = orders.get_mut(exchange_order_id) {
            if order.status == ExchangeOrderStatus::Open {
                order.status = ExchangeOrderStatus::Canceled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fetch_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<ExchangeOrderSnapshot, TransportError> {
        let orders = self.orders.lock().await;
        let order = orders
            .get(exchange_order_id)
            .ok_or_else(|| TransportError::Rejected(format!("unknown order {exchange_order_id}")))?;
        Ok(ExchangeOrderSnapshot {
            exchange_order_id: exchange_order_id.to_string(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            average_fill_price: Some(order.price),
            fee: None,
            fee_asset: None,
        })
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _since: Option<i64>,
        _limit: Option<u32>,
    ) -> Result<Vec<Candle>, TransportError> {
        Ok(Vec::new())
    }

    async fn fetch_my_trades(
        &self,
        _symbol: &str,
        _since: Option<i64>,
        _limit: Option<u32>,
    ) -> Result<Vec<ExchangeTrade>, TransportError> {
        Ok(Vec::new())
    }
}

/// No-op private stream; tests that need fill events push them directly
/// through the channel returned by the engine under test instead.
pub struct MockUserDataStream;

#[async_trait]
impl UserDataStream for MockUserDataStream {
    async fn run(&self, _sink: Sender<UserDataEvent>) -> Result<(), TransportError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn shared() -> Arc<MockExchangeAdapter> {
    Arc::new(MockExchangeAdapter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_order_fills_immediately_at_ticker_price() {
        let adapter = MockExchangeAdapter::new();
        adapter
            .set_ticker(Ticker {
                last: Decimal::from(100),
                bid: Decimal::from(99),
                ask: Decimal::from(101),
            })
            .await;

        let ack = adapter
            .create_order("BTC/USDT", OrderSide::Buy, OrderType::Market, Decimal::ONE, None, "cid-1")
            .await
            .unwrap();
        assert_eq!(ack.status, ExchangeOrderStatus::Closed);

        let snapshot = adapter.fetch_order(&ack.exchange_order_id, "BTC/USDT").await.unwrap();
        assert_eq!(snapshot.average_fill_price, Some(Decimal::from(100)));
    }

    #[tokio::test]
    async fn reject_next_order_rejects_exactly_one_order() {
        let adapter = MockExchangeAdapter::new();
        adapter.reject_next_order().await;

        let first = adapter
            .create_order("BTC/USDT", OrderSide::Buy, OrderType::Market, Decimal::ONE, None, "cid-1")
            .await;
        assert!(matches!(first, Err(TransportError::Rejected(_))));

        let second = adapter
            .create_order("BTC/USDT", OrderSide::Buy, OrderType::Market, Decimal::ONE, None, "cid-2")
            .await;
        assert!(second.is_ok());
    }
}
