use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Best bid/ask/last snapshot for a symbol, as returned by `fetch_ticker`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Free/total balances per asset, as returned by `fetch_balance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub free: HashMap<String, Decimal>,
    pub total: HashMap<String, Decimal>,
}

impl Balance {
    pub fn free_of(&self, asset: &str) -> Decimal {
        self.free.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_of(&self, asset: &str) -> Decimal {
        self.total.get(asset).copied().unwrap_or(Decimal::ZERO)
    }
}

/// One OHLCV bar, used by the optional ATR dynamic-grid calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Exchange-side market rules used to normalize candidate orders before submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub min_notional: Decimal,
    pub min_qty: Decimal,
    pub step_size: Decimal,
}

/// Fee attached to a fill; currency may be base, quote, or a third asset (BNB etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fee {
    pub cost: Decimal,
    pub currency: String,
}

/// A single execution reported by the exchange, used by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTrade {
    pub exchange_trade_id: String,
    pub order_exchange_id: Option<String>,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Fee>,
    pub timestamp: i64,
}

pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    symbol.split_once('/')
}
