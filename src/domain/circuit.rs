use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CircuitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::str::FromStr for CircuitState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            other => anyhow::bail!("unknown circuit state: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    OrderRateExceeded,
    LossLimitExceeded,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::OrderRateExceeded => "ORDER_RATE_EXCEEDED",
            TripReason::LossLimitExceeded => "LOSS_LIMIT_EXCEEDED",
        }
    }
}

/// Per-bot circuit breaker configuration, loaded once at bot start.
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub max_orders_per_minute: u64,
    pub max_loss_percent_per_hour: Decimal,
    pub max_price_deviation_percent: Decimal,
    pub cooldown_seconds: u64,
    pub half_open_orders: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_orders_per_minute: 50,
            max_loss_percent_per_hour: Decimal::new(50, 1),
            max_price_deviation_percent: Decimal::new(100, 1),
            cooldown_seconds: 300,
            half_open_orders: 3,
        }
    }
}

/// A snapshot of the counters read back from the key-value store for one
/// evaluation. The store, not this type, owns TTL expiry.
#[derive(Debug, Clone, Copy)]
pub struct CircuitCounters {
    pub state: CircuitState,
    pub order_count_60s: u64,
    pub loss_1h: Decimal,
    pub cooldown_active: bool,
    /// Orders already admitted during the current HALF_OPEN window. Ignored
    /// outside HALF_OPEN.
    pub half_open_admitted: u32,
}

/// Evaluates the four gates in order. `order_price` is `None` for market
/// orders, which skip the deviation gate. `current_price` of zero is
/// treated as 100% deviation, i.e. always denied when a price is given.
/// The first two gates return a `TripReason` the caller must persist via
/// `record_trip`; the price-deviation gate denies this one order without
/// tripping the breaker.
pub fn check_order_allowed(
    config: &CircuitConfig,
    counters: &CircuitCounters,
    order_price: Option<Decimal>,
    current_price: Decimal,
    investment: Decimal,
) -> Result<(), CircuitError> {
    if counters.state == CircuitState::Open && counters.cooldown_active {
        return Err(CircuitError::Open);
    }

    if counters.state == CircuitState::HalfOpen && counters.half_open_admitted >= config.half_open_orders {
        return Err(CircuitError::HalfOpenLimitExceeded {
            count: counters.half_open_admitted,
            limit: config.half_open_orders,
        });
    }

    if counters.order_count_60s >= config.max_orders_per_minute {
        return Err(CircuitError::RateExceeded {
            count: counters.order_count_60s,
            limit: config.max_orders_per_minute,
        });
    }

    if investment > Decimal::ZERO {
        let loss_pct = counters.loss_1h / investment * Decimal::ONE_HUNDRED;
        if loss_pct >= config.max_loss_percent_per_hour {
            return Err(CircuitError::LossLimitExceeded {
                loss_pct,
                limit_pct: config.max_loss_percent_per_hour,
            });
        }
    }

    if let Some(order_price) = order_price {
        let deviation_pct = if current_price.is_zero() {
            Decimal::ONE_HUNDRED
        } else {
            ((order_price - current_price) / current_price).abs() * Decimal::ONE_HUNDRED
        };
        if deviation_pct > config.max_price_deviation_percent {
            return Err(CircuitError::PriceDeviationExceeded {
                deviation_pct,
                limit_pct: config.max_price_deviation_percent,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(state: CircuitState) -> CircuitCounters {
        CircuitCounters {
            state,
            order_count_60s: 0,
            loss_1h: Decimal::ZERO,
            cooldown_active: state == CircuitState::Open,
            half_open_admitted: 0,
        }
    }

    #[test]
    fn half_open_denies_once_admission_limit_reached() {
        let config = CircuitConfig::default();
        let mut c = counters(CircuitState::HalfOpen);
        c.half_open_admitted = config.half_open_orders;
        let err = check_order_allowed(&config, &c, None, Decimal::new(50000, 0), Decimal::new(1000, 0)).unwrap_err();
        assert!(matches!(err, CircuitError::HalfOpenLimitExceeded { .. }));
    }

    #[test]
    fn half_open_allows_below_admission_limit() {
        let config = CircuitConfig::default();
        let mut c = counters(CircuitState::HalfOpen);
        c.half_open_admitted = config.half_open_orders - 1;
        assert!(check_order_allowed(&config, &c, None, Decimal::new(50000, 0), Decimal::new(1000, 0)).is_ok());
    }

    #[test]
    fn open_with_active_cooldown_denies() {
        let config = CircuitConfig::default();
        let err = check_order_allowed(
            &config,
            &counters(CircuitState::Open),
            None,
            Decimal::new(50000, 0),
            Decimal::new(1000, 0),
        )
        .unwrap_err();
        assert_eq!(err, CircuitError::Open);
    }

    #[test]
    fn order_rate_exceeded_trips() {
        let config = CircuitConfig::default();
        let mut c = counters(CircuitState::Closed);
        c.order_count_60s = 50;
        let err = check_order_allowed(&config, &c, None, Decimal::new(50000, 0), Decimal::new(1000, 0))
            .unwrap_err();
        assert_eq!(
            err,
            CircuitError::RateExceeded {
                count: 50,
                limit: 50
            }
        );
    }

    #[test]
    fn loss_limit_exceeded_trips() {
        let config = CircuitConfig::default();
        let mut c = counters(CircuitState::Closed);
        c.loss_1h = Decimal::new(60, 0);
        let err = check_order_allowed(&config, &c, None, Decimal::new(50000, 0), Decimal::new(1000, 0))
            .unwrap_err();
        assert!(matches!(err, CircuitError::LossLimitExceeded { .. }));
    }

    #[test]
    fn price_deviation_denies_without_tripping() {
        let config = CircuitConfig::default();
        let c = counters(CircuitState::Closed);
        let err = check_order_allowed(
            &config,
            &c,
            Some(Decimal::new(56000, 0)),
            Decimal::new(50000, 0),
            Decimal::new(1000, 0),
        )
        .unwrap_err();
        match err {
            CircuitError::PriceDeviationExceeded {
                deviation_pct,
                limit_pct,
            } => {
                assert_eq!(deviation_pct, Decimal::new(1200, 2));
                assert_eq!(limit_pct, Decimal::new(1000, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_current_price_is_treated_as_full_deviation() {
        let config = CircuitConfig::default();
        let c = counters(CircuitState::Closed);
        let err = check_order_allowed(
            &config,
            &c,
            Some(Decimal::new(100, 0)),
            Decimal::ZERO,
            Decimal::new(1000, 0),
        )
        .unwrap_err();
        assert!(matches!(err, CircuitError::PriceDeviationExceeded { .. }));
    }

    #[test]
    fn all_gates_clear_allows() {
        let config = CircuitConfig::default();
        let c = counters(CircuitState::Closed);
        assert!(check_order_allowed(
            &config,
            &c,
            Some(Decimal::new(50100, 0)),
            Decimal::new(50000, 0),
            Decimal::new(1000, 0),
        )
        .is_ok());
    }
}
