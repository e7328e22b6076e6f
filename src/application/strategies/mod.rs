pub mod dca;
pub mod grid;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::strategy::{OpenOrderView, StrategyOrder};
use crate::domain::trading::types::Candle;

/// Decision contract shared by grid and DCA. Implementors own their
/// in-memory state and expose it for persistence via `to_state_json` /
/// `from_state_json` so the supervisor can rehydrate a bot after restart.
pub trait StrategyEngine: Send + Sync {
    fn calculate_orders(&mut self, current_price: Decimal, open_orders: &[OpenOrderView]) -> Vec<StrategyOrder>;

    /// Returns the realized P&L delta attributable to this fill.
    fn on_order_filled(&mut self, order: &OpenOrderView, fill_price: Decimal, fill_quantity: Decimal) -> Decimal;

    fn should_stop(&self, current_price: Decimal) -> bool;

    fn to_state_json(&self) -> serde_json::Value;

    /// Candle timeframe and lookback this strategy needs fetched before
    /// `calculate_orders`, if any. `None` means the engine skips the fetch.
    fn candle_requirement(&self) -> Option<(&'static str, u32)> {
        None
    }

    /// Hands freshly fetched, oldest-first candles to the strategy so it can
    /// update any indicator-driven state before orders are computed this tick.
    fn apply_candles(&mut self, _candles: &[Candle], _current_price: Decimal, _now: DateTime<Utc>) {}
}
