use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::trading::types::{Candle, OrderSide, OrderType};

/// A candidate order a strategy wants placed, before capital/exchange
/// filtering in the engine turns it into a `ManagedOrder`.
#[derive(Debug, Clone, Copy)]
pub struct StrategyOrder {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub grid_level: Option<i32>,
}

impl StrategyOrder {
    pub fn limit(side: OrderSide, price: Decimal, quantity: Decimal, grid_level: i32) -> Self {
        Self {
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            grid_level: Some(grid_level),
        }
    }

    pub fn market(side: OrderSide, quantity: Decimal) -> Self {
        Self {
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            grid_level: None,
        }
    }
}

/// A currently-open order as the strategy sees it: just enough to decide
/// whether a slot is occupied, not the full managed-order record.
#[derive(Debug, Clone, Copy)]
pub struct OpenOrderView {
    pub side: OrderSide,
    pub grid_level: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub grid_count: u32,
    pub investment: Decimal,
    /// ATR-based regrid. Absent means a fixed band for the bot's lifetime.
    #[serde(default)]
    pub dynamic_range: Option<DynamicRangeConfig>,
}

impl GridConfig {
    pub fn spacing(&self) -> Decimal {
        Self::spacing_between(self.lower_price, self.upper_price, self.grid_count)
    }

    pub fn amount_per_grid(&self) -> Decimal {
        self.investment / Decimal::from(self.grid_count)
    }

    pub fn level_price(&self, index: u32) -> Decimal {
        Self::level_price_between(self.lower_price, self.upper_price, self.grid_count, index)
    }

    pub fn spacing_between(lower_price: Decimal, upper_price: Decimal, grid_count: u32) -> Decimal {
        (upper_price - lower_price) / Decimal::from(grid_count)
    }

    pub fn level_price_between(lower_price: Decimal, upper_price: Decimal, grid_count: u32, index: u32) -> Decimal {
        lower_price + Self::spacing_between(lower_price, upper_price, grid_count) * Decimal::from(index)
    }
}

/// When and how a running grid may recenter its band around the market
/// using ATR, instead of keeping `lower_price`/`upper_price` fixed forever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DynamicRangeConfig {
    pub atr_period: u32,
    pub atr_timeframe: AtrTimeframe,
    pub atr_multiplier: Decimal,
    pub recenter_minutes: u32,
    pub cooldown_minutes: u32,
    pub policy: RecenterPolicy,
}

/// Candle timeframe the ATR regrid check is computed on, independent of
/// whatever timeframe the bot's own chart uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtrTimeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl AtrTimeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

/// Guard applied once a regrid is otherwise due (cooldown elapsed, band
/// exited or `recenter_minutes` elapsed). See `domain::strategy::GridState`
/// for the bookkeeping (`blocked_since`) `MaxWait` needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RecenterPolicy {
    /// Any open position at any level blocks the regrid.
    BlockAny,
    /// Only a position whose level would fall outside the proposed new band blocks the regrid.
    BlockOutsideRange,
    /// Allowed once unrealized P&L across all open levels reaches the threshold.
    AllowAboveUnrealizedPnl { threshold: Decimal },
    /// Allowed once a regrid has been blocked for at least this long.
    MaxWait { max_wait_minutes: u32 },
}

/// Average true range over the most recent `period` candles (a simple mean
/// of true range, not Wilder-smoothed). `candles` must be oldest-first, the
/// order `ExchangeAdapter::fetch_ohlcv` returns. `None` when there isn't
/// enough history.
pub fn average_true_range(candles: &[Candle], period: u32) -> Option<Decimal> {
    let period = period as usize;
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum = Decimal::ZERO;
    for i in start..candles.len() {
        let candle = candles[i];
        let prev_close = candles[i - 1].close;
        let true_range = (candle.high - candle.low)
            .max((candle.high - prev_close).abs())
            .max((candle.low - prev_close).abs());
        sum += true_range;
    }
    Some(sum / Decimal::from(period))
}

/// In-memory per-level state for a running grid bot. `levels[i]` tracks the
/// position (if any) held at `level_price(lower_price, upper_price, i)`.
/// `lower_price`/`upper_price` start at the config's band and only move if
/// the config enables `dynamic_range`; a regrid preserves per-level
/// positions since the levels vector never changes size or order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridState {
    pub levels: Vec<GridLevelState>,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub last_regrid_at: Option<DateTime<Utc>>,
    /// Set the first time a due regrid is blocked by policy, cleared once one succeeds. Drives `RecenterPolicy::MaxWait`.
    pub blocked_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct GridLevelState {
    pub position_qty: Decimal,
    pub avg_buy_price: Decimal,
}

impl GridLevelState {
    pub fn has_position(&self) -> bool {
        self.position_qty > Decimal::ZERO
    }
}

impl GridState {
    pub fn new(grid_count: u32, lower_price: Decimal, upper_price: Decimal) -> Self {
        Self {
            levels: vec![GridLevelState::default(); grid_count as usize],
            lower_price,
            upper_price,
            last_regrid_at: None,
            blocked_since: None,
        }
    }

    /// Sum of (current_price - avg_buy_price) * position_qty across every open level.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        self.levels
            .iter()
            .filter(|l| l.has_position())
            .map(|l| (current_price - l.avg_buy_price) * l.position_qty)
            .sum()
    }

    /// Whether any open level would sit outside `[new_lower, new_upper]` once regridded.
    pub fn has_position_outside_band(&self, grid_count: u32, new_lower: Decimal, new_upper: Decimal) -> bool {
        self.levels.iter().enumerate().any(|(i, l)| {
            if !l.has_position() {
                return false;
            }
            let price = GridConfig::level_price_between(new_lower, new_upper, grid_count, i as u32);
            price < new_lower || price > new_upper
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DcaInterval {
    Hourly,
    Daily,
    Weekly,
}

impl DcaInterval {
    pub fn duration(&self) -> chrono::Duration {
        match self {
            DcaInterval::Hourly => chrono::Duration::hours(1),
            DcaInterval::Daily => chrono::Duration::days(1),
            DcaInterval::Weekly => chrono::Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DcaConfig {
    pub investment: Decimal,
    pub amount_per_buy: Decimal,
    pub interval: Option<DcaInterval>,
    pub trigger_drop_percent: Option<Decimal>,
    pub take_profit_percent: Option<Decimal>,
}

impl DcaConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_none() && self.trigger_drop_percent.is_none() {
            anyhow::bail!("DCA requires at least one of interval or trigger_drop_percent");
        }
        if self.amount_per_buy > self.investment {
            anyhow::bail!("amount_per_buy must not exceed investment");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaState {
    pub total_spent: Decimal,
    pub total_quantity: Decimal,
    pub last_buy_time: Option<chrono::DateTime<chrono::Utc>>,
    pub highest_price: Option<Decimal>,
}

impl DcaState {
    pub fn new() -> Self {
        Self {
            total_spent: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
            last_buy_time: None,
            highest_price: None,
        }
    }

    pub fn remaining_budget(&self, investment: Decimal) -> Decimal {
        investment - self.total_spent
    }

    pub fn average_entry_price(&self) -> Decimal {
        if self.total_quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_spent / self.total_quantity
        }
    }
}

impl Default for DcaState {
    fn default() -> Self {
        Self::new()
    }
}
