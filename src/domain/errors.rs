use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the exchange adapter boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient transport failure: {0}")]
    Retryable(String),

    #[error("authentication or permission failure: {0}")]
    Fatal(String),

    #[error("exchange rejected the order: {0}")]
    Rejected(String),

    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors from the order state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {0} has no exchange_id to cancel remotely")]
    NoExchangeId(String),

    #[error("retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

/// Errors from the distributed circuit breaker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("circuit_breaker_open")]
    Open,

    #[error("order_rate_exceeded ({count}/{limit} per minute)")]
    RateExceeded { count: u64, limit: u64 },

    #[error("loss_limit_exceeded ({loss_pct:.2}%/{limit_pct:.2}%)")]
    LossLimitExceeded { loss_pct: Decimal, limit_pct: Decimal },

    #[error("price_deviation_exceeded ({deviation_pct:.2}%/{limit_pct:.2}%)")]
    PriceDeviationExceeded {
        deviation_pct: Decimal,
        limit_pct: Decimal,
    },

    #[error("half_open_order_limit_exceeded ({count}/{limit})")]
    HalfOpenLimitExceeded { count: u32, limit: u32 },
}

/// Errors from the risk manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("order denied: bot is paused ({reason})")]
    Paused { reason: String },

    #[error("order denied: bot is pending liquidation")]
    PendingLiquidation,

    #[error("order denied: bot has been liquidated")]
    Liquidated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_error_messages_carry_figures() {
        let err = CircuitError::PriceDeviationExceeded {
            deviation_pct: Decimal::new(1200, 2),
            limit_pct: Decimal::new(1000, 2),
        };
        let msg = err.to_string();
        assert!(msg.contains("12.00%"));
        assert!(msg.contains("10.00%"));
    }

    #[test]
    fn order_error_distinguishes_states() {
        let err = OrderError::InvalidTransition {
            from: "FILLED".into(),
            to: "SUBMITTING".into(),
        };
        assert!(err.to_string().contains("FILLED"));
    }
}
