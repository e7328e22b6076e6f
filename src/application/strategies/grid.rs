use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::strategy::{average_true_range, GridConfig, GridState, OpenOrderView, RecenterPolicy, StrategyOrder};
use crate::domain::trading::types::{Candle, OrderSide};

use super::StrategyEngine;

/// Level-indexed limit ladder. Each level holds at most one position; a
/// filled buy at level i waits for price to rise back above that level
/// before a matching sell is emitted. The band (`state.lower_price`/
/// `upper_price`) can drift away from `config.lower_price`/`upper_price`
/// over time if `config.dynamic_range` is set.
pub struct GridStrategy {
    config: GridConfig,
    state: GridState,
}

impl GridStrategy {
    pub fn new(config: GridConfig) -> Self {
        let state = GridState::new(config.grid_count, config.lower_price, config.upper_price);
        Self { config, state }
    }

    pub fn from_state(config: GridConfig, state: GridState) -> Self {
        Self { config, state }
    }

    fn has_active_order(open_orders: &[OpenOrderView], side: OrderSide, level: i32) -> bool {
        open_orders
            .iter()
            .any(|o| o.side == side && o.grid_level == Some(level))
    }

    fn level_price(&self, index: u32) -> Decimal {
        GridConfig::level_price_between(self.state.lower_price, self.state.upper_price, self.config.grid_count, index)
    }

    /// Cooldown elapsed AND (band exited OR recenter_minutes elapsed).
    fn regrid_due(&self, cfg: &crate::domain::strategy::DynamicRangeConfig, current_price: Decimal, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.state.last_regrid_at {
            if now.signed_duration_since(last).num_minutes() < cfg.cooldown_minutes as i64 {
                return false;
            }
        }

        let band_exited = current_price < self.state.lower_price || current_price > self.state.upper_price;
        let scheduled = self
            .state
            .last_regrid_at
            .map(|last| now.signed_duration_since(last).num_minutes() >= cfg.recenter_minutes as i64)
            .unwrap_or(false);

        band_exited || scheduled
    }

    fn policy_allows(
        &self,
        cfg: &crate::domain::strategy::DynamicRangeConfig,
        new_lower: Decimal,
        new_upper: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> bool {
        match cfg.policy {
            RecenterPolicy::BlockAny => !self.state.levels.iter().any(|l| l.has_position()),
            RecenterPolicy::BlockOutsideRange => {
                !self.state.has_position_outside_band(self.config.grid_count, new_lower, new_upper)
            }
            RecenterPolicy::AllowAboveUnrealizedPnl { threshold } => self.state.unrealized_pnl(current_price) >= threshold,
            RecenterPolicy::MaxWait { max_wait_minutes } => self
                .state
                .blocked_since
                .map(|since| now.signed_duration_since(since).num_minutes() >= max_wait_minutes as i64)
                .unwrap_or(false),
        }
    }
}

impl StrategyEngine for GridStrategy {
    fn calculate_orders(&mut self, current_price: Decimal, open_orders: &[OpenOrderView]) -> Vec<StrategyOrder> {
        let mut candidates = Vec::new();

        for i in 0..self.config.grid_count {
            let level_price = self.level_price(i);
            if level_price == current_price {
                continue;
            }

            let level = &self.state.levels[i as usize];

            if level_price < current_price
                && !level.has_position()
                && !Self::has_active_order(open_orders, OrderSide::Buy, i as i32)
            {
                let quantity = self.config.amount_per_grid() / level_price;
                candidates.push(StrategyOrder::limit(OrderSide::Buy, level_price, quantity, i as i32));
            }

            if level_price > current_price
                && level.has_position()
                && !Self::has_active_order(open_orders, OrderSide::Sell, i as i32)
            {
                candidates.push(StrategyOrder::limit(
                    OrderSide::Sell,
                    level_price,
                    level.position_qty,
                    i as i32,
                ));
            }
        }

        candidates.sort_by_key(|o| (o.price.unwrap_or_default() - current_price).abs());
        candidates
    }

    fn on_order_filled(&mut self, order: &OpenOrderView, fill_price: Decimal, fill_quantity: Decimal) -> Decimal {
        let Some(level) = order.grid_level else {
            return Decimal::ZERO;
        };
        let Some(slot) = self.state.levels.get_mut(level as usize) else {
            return Decimal::ZERO;
        };

        match order.side {
            OrderSide::Buy => {
                slot.position_qty += fill_quantity;
                slot.avg_buy_price = fill_price;
                Decimal::ZERO
            }
            OrderSide::Sell => {
                let realized = (fill_price - slot.avg_buy_price) * fill_quantity;
                slot.position_qty = Decimal::ZERO;
                slot.avg_buy_price = Decimal::ZERO;
                realized
            }
        }
    }

    fn should_stop(&self, current_price: Decimal) -> bool {
        current_price < self.state.lower_price * dec!(0.95) || current_price > self.state.upper_price * dec!(1.05)
    }

    fn to_state_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null)
    }

    fn candle_requirement(&self) -> Option<(&'static str, u32)> {
        self.config.dynamic_range.map(|d| (d.atr_timeframe.as_str(), d.atr_period))
    }

    fn apply_candles(&mut self, candles: &[Candle], current_price: Decimal, now: DateTime<Utc>) {
        let Some(dynamic_range) = self.config.dynamic_range else {
            return;
        };

        if !self.regrid_due(&dynamic_range, current_price, now) {
            return;
        }

        let Some(atr) = average_true_range(candles, dynamic_range.atr_period) else {
            return;
        };

        let half_width = atr * dynamic_range.atr_multiplier;
        let new_lower = current_price - half_width;
        let new_upper = current_price + half_width;

        if !self.policy_allows(&dynamic_range, new_lower, new_upper, current_price, now) {
            if self.state.blocked_since.is_none() {
                self.state.blocked_since = Some(now);
            }
            return;
        }

        self.state.lower_price = new_lower;
        self.state.upper_price = new_upper;
        self.state.last_regrid_at = Some(now);
        self.state.blocked_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::{AtrTimeframe, DynamicRangeConfig};
    use rust_decimal_macros::dec;

    fn config() -> GridConfig {
        GridConfig {
            lower_price: dec!(45000),
            upper_price: dec!(55000),
            grid_count: 20,
            investment: dec!(1000),
            dynamic_range: None,
        }
    }

    fn candle(high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: Decimal::ZERO,
        }
    }

    #[test]
    fn emits_buy_orders_below_current_price_only() {
        let mut strategy = GridStrategy::new(config());
        let orders = strategy.calculate_orders(dec!(50000), &[]);
        assert!(orders.iter().all(|o| o.side == OrderSide::Buy));
        assert!(orders.iter().all(|o| o.price.unwrap() < dec!(50000)));
    }

    #[test]
    fn never_emits_at_level_equal_to_current_price() {
        let mut strategy = GridStrategy::new(config());
        let level_5_price = config().level_price(5);
        let orders = strategy.calculate_orders(level_5_price, &[]);
        assert!(orders.iter().all(|o| o.grid_level != Some(5)));
    }

    #[test]
    fn buy_fill_then_price_recovery_emits_matching_sell() {
        let mut strategy = GridStrategy::new(config());
        let fill_view = OpenOrderView {
            side: OrderSide::Buy,
            grid_level: Some(9),
        };
        let pnl = strategy.on_order_filled(&fill_view, dec!(49500), dec!(0.001));
        assert_eq!(pnl, Decimal::ZERO);

        let orders = strategy.calculate_orders(dec!(49000), &[]);
        let sell = orders
            .iter()
            .find(|o| o.grid_level == Some(9) && o.side == OrderSide::Sell)
            .expect("expected a sell at level 9");
        assert_eq!(sell.quantity, dec!(0.001));
    }

    #[test]
    fn dedupe_prevents_stacking_on_same_level() {
        let mut strategy = GridStrategy::new(config());
        let open = [OpenOrderView {
            side: OrderSide::Buy,
            grid_level: Some(0),
        }];
        let orders = strategy.calculate_orders(dec!(50000), &open);
        assert!(orders.iter().all(|o| o.grid_level != Some(0)));
    }

    #[test]
    fn should_stop_outside_band() {
        let strategy = GridStrategy::new(config());
        assert!(strategy.should_stop(dec!(40000)));
        assert!(strategy.should_stop(dec!(60000)));
        assert!(!strategy.should_stop(dec!(50000)));
    }

    #[test]
    fn no_candle_requirement_without_dynamic_range() {
        let strategy = GridStrategy::new(config());
        assert!(strategy.candle_requirement().is_none());
    }

    #[test]
    fn candle_requirement_reflects_configured_timeframe_and_period() {
        let mut cfg = config();
        cfg.dynamic_range = Some(DynamicRangeConfig {
            atr_period: 14,
            atr_timeframe: AtrTimeframe::OneHour,
            atr_multiplier: dec!(2),
            recenter_minutes: 60,
            cooldown_minutes: 30,
            policy: RecenterPolicy::BlockAny,
        });
        let strategy = GridStrategy::new(cfg);
        assert_eq!(strategy.candle_requirement(), Some(("1h", 14)));
    }

    #[test]
    fn regrids_on_band_exit_when_unblocked() {
        let mut cfg = config();
        cfg.dynamic_range = Some(DynamicRangeConfig {
            atr_period: 3,
            atr_timeframe: AtrTimeframe::OneHour,
            atr_multiplier: dec!(2),
            recenter_minutes: 60,
            cooldown_minutes: 0,
            policy: RecenterPolicy::BlockAny,
        });
        let mut strategy = GridStrategy::new(cfg);

        let candles = vec![
            candle(dec!(56100), dec!(55900), dec!(56000)),
            candle(dec!(56200), dec!(56000), dec!(56100)),
            candle(dec!(56300), dec!(56100), dec!(56200)),
            candle(dec!(56400), dec!(56200), dec!(56300)),
        ];

        let now = Utc::now();
        strategy.apply_candles(&candles, dec!(56000), now);

        assert_eq!(strategy.state.last_regrid_at, Some(now));
        assert!(strategy.state.lower_price > dec!(45000));
        assert!(strategy.state.upper_price > dec!(55000));
    }

    #[test]
    fn block_any_policy_blocks_regrid_with_open_position() {
        let mut cfg = config();
        cfg.dynamic_range = Some(DynamicRangeConfig {
            atr_period: 3,
            atr_timeframe: AtrTimeframe::OneHour,
            atr_multiplier: dec!(2),
            recenter_minutes: 60,
            cooldown_minutes: 0,
            policy: RecenterPolicy::BlockAny,
        });
        let mut strategy = GridStrategy::new(cfg);
        strategy.state.levels[0].position_qty = dec!(0.01);
        strategy.state.levels[0].avg_buy_price = dec!(45500);

        let candles = vec![
            candle(dec!(56100), dec!(55900), dec!(56000)),
            candle(dec!(56200), dec!(56000), dec!(56100)),
            candle(dec!(56300), dec!(56100), dec!(56200)),
            candle(dec!(56400), dec!(56200), dec!(56300)),
        ];

        let now = Utc::now();
        strategy.apply_candles(&candles, dec!(56000), now);

        assert_eq!(strategy.state.lower_price, dec!(45000));
        assert_eq!(strategy.state.upper_price, dec!(55000));
        assert_eq!(strategy.state.blocked_since, Some(now));
    }

    #[test]
    fn cooldown_suppresses_regrid_even_when_band_exited() {
        let mut cfg = config();
        cfg.dynamic_range = Some(DynamicRangeConfig {
            atr_period: 3,
            atr_timeframe: AtrTimeframe::OneHour,
            atr_multiplier: dec!(2),
            recenter_minutes: 60,
            cooldown_minutes: 30,
            policy: RecenterPolicy::BlockAny,
        });
        let mut strategy = GridStrategy::new(cfg);
        let now = Utc::now();
        strategy.state.last_regrid_at = Some(now - chrono::Duration::minutes(5));

        let candles = vec![
            candle(dec!(56100), dec!(55900), dec!(56000)),
            candle(dec!(56200), dec!(56000), dec!(56100)),
            candle(dec!(56300), dec!(56100), dec!(56200)),
            candle(dec!(56400), dec!(56200), dec!(56300)),
        ];

        strategy.apply_candles(&candles, dec!(56000), now);

        assert_eq!(strategy.state.lower_price, dec!(45000));
        assert_eq!(strategy.state.upper_price, dec!(55000));
    }
}
