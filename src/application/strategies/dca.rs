use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::strategy::{DcaConfig, DcaState, OpenOrderView, StrategyOrder};
use crate::domain::trading::types::OrderSide;

use super::StrategyEngine;

/// Time- and drawdown-triggered market buys with optional take-profit.
/// At most one order per tick: the first matching rule wins.
pub struct DcaStrategy {
    config: DcaConfig,
    state: DcaState,
}

impl DcaStrategy {
    pub fn new(config: DcaConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: DcaState::new(),
        })
    }

    pub fn from_state(config: DcaConfig, state: DcaState) -> Self {
        Self { config, state }
    }

    fn has_position(&self) -> bool {
        self.state.total_quantity > Decimal::ZERO
    }
}

impl StrategyEngine for DcaStrategy {
    fn calculate_orders(&mut self, current_price: Decimal, _open_orders: &[OpenOrderView]) -> Vec<StrategyOrder> {
        let remaining = self.state.remaining_budget(self.config.investment);

        if remaining < self.config.amount_per_buy && !self.has_position() {
            return vec![];
        }

        if let Some(tp) = self.config.take_profit_percent {
            let avg_entry = self.state.average_entry_price();
            if self.has_position() && current_price >= avg_entry * (Decimal::ONE_HUNDRED + tp) / Decimal::ONE_HUNDRED {
                return vec![StrategyOrder::market(OrderSide::Sell, self.state.total_quantity)];
            }
        }

        if let Some(interval) = self.config.interval {
            let due = match self.state.last_buy_time {
                None => true,
                Some(last) => Utc::now() - last >= interval.duration(),
            };
            if due && remaining >= self.config.amount_per_buy {
                let qty = self.config.amount_per_buy / current_price;
                return vec![StrategyOrder::market(OrderSide::Buy, qty)];
            }
        } else if let Some(trigger_drop) = self.config.trigger_drop_percent {
            if let Some(highest) = self.state.highest_price {
                let drop_pct = (highest - current_price) / highest * Decimal::ONE_HUNDRED;
                if drop_pct >= trigger_drop && remaining >= self.config.amount_per_buy {
                    let qty = self.config.amount_per_buy / current_price;
                    return vec![StrategyOrder::market(OrderSide::Buy, qty)];
                }
            }
        }

        self.state.highest_price = Some(
            self.state
                .highest_price
                .map_or(current_price, |h| h.max(current_price)),
        );
        vec![]
    }

    fn on_order_filled(&mut self, order: &OpenOrderView, fill_price: Decimal, fill_quantity: Decimal) -> Decimal {
        match order.side {
            OrderSide::Buy => {
                self.state.total_spent += fill_price * fill_quantity;
                self.state.total_quantity += fill_quantity;
                self.state.last_buy_time = Some(Utc::now());
                self.state.highest_price = Some(fill_price);
                Decimal::ZERO
            }
            OrderSide::Sell => {
                let avg_entry = self.state.average_entry_price();
                let realized = fill_price * fill_quantity - avg_entry * fill_quantity;
                self.state.total_spent = Decimal::ZERO;
                self.state.total_quantity = Decimal::ZERO;
                self.state.last_buy_time = None;
                self.state.highest_price = None;
                realized
            }
        }
    }

    fn should_stop(&self, _current_price: Decimal) -> bool {
        self.state.remaining_budget(self.config.investment) <= Decimal::ZERO && !self.has_position()
    }

    fn to_state_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::DcaInterval;
    use rust_decimal_macros::dec;

    fn config() -> DcaConfig {
        DcaConfig {
            investment: dec!(1000),
            amount_per_buy: dec!(100),
            interval: Some(DcaInterval::Daily),
            trigger_drop_percent: None,
            take_profit_percent: None,
        }
    }

    #[test]
    fn first_tick_buys_immediately_when_interval_set() {
        let mut strategy = DcaStrategy::new(config()).unwrap();
        let orders = strategy.calculate_orders(dec!(50000), &[]);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
    }

    #[test]
    fn average_entry_and_remaining_budget_track_buys() {
        let mut strategy = DcaStrategy::new(config()).unwrap();
        let fill = OpenOrderView {
            side: OrderSide::Buy,
            grid_level: None,
        };
        strategy.on_order_filled(&fill, dec!(50000), dec!(0.002));
        strategy.on_order_filled(&fill, dec!(40000), dec!(0.0025));

        assert_eq!(strategy.state.remaining_budget(strategy.config.investment), dec!(800));
        let avg = strategy.state.average_entry_price();
        assert_eq!(avg, (dec!(100) + dec!(100)) / (dec!(0.002) + dec!(0.0025)));
    }

    #[test]
    fn validate_rejects_config_with_no_trigger() {
        let config = DcaConfig {
            investment: dec!(1000),
            amount_per_buy: dec!(100),
            interval: None,
            trigger_drop_percent: None,
            take_profit_percent: None,
        };
        assert!(DcaStrategy::new(config).is_err());
    }

    #[test]
    fn take_profit_emits_full_sell() {
        let mut strategy = DcaStrategy::new(DcaConfig {
            investment: dec!(1000),
            amount_per_buy: dec!(100),
            interval: Some(DcaInterval::Daily),
            trigger_drop_percent: None,
            take_profit_percent: Some(dec!(10)),
        })
        .unwrap();
        let fill = OpenOrderView {
            side: OrderSide::Buy,
            grid_level: None,
        };
        strategy.on_order_filled(&fill, dec!(100), dec!(1));

        let orders = strategy.calculate_orders(dec!(111), &[]);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].quantity, dec!(1));
    }

    #[test]
    fn should_stop_when_budget_exhausted_and_flat() {
        let mut strategy = DcaStrategy::new(config()).unwrap();
        strategy.state.total_spent = dec!(1000);
        assert!(strategy.should_stop(dec!(50000)));
    }
}
