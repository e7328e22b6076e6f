use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::OrderError;
use crate::domain::trading::types::{OrderSide, OrderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Submitting,
    Open,
    Partial,
    Filled,
    Cancelling,
    Cancelled,
    Rejected,
    Error,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Submitting => "SUBMITTING",
            OrderState::Open => "OPEN",
            OrderState::Partial => "PARTIAL",
            OrderState::Filled => "FILLED",
            OrderState::Cancelling => "CANCELLING",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
            OrderState::Error => "ERROR",
        }
    }

    /// Returns Ok(()) if `self -> next` is an allowed transition, Err otherwise.
    /// Mirrors the transition matrix exactly: PENDING only advances to
    /// SUBMITTING or CANCELLED; SUBMITTING resolves to OPEN, FILLED, REJECTED
    /// or ERROR; OPEN/PARTIAL can fill, move to CANCELLING, or error;
    /// CANCELLING resolves to FILLED (a fill raced the cancel), CANCELLED, or
    /// ERROR. FILLED, CANCELLED and REJECTED accept nothing further. ERROR is
    /// terminal for trading purposes but reachable; it has no escape because
    /// resolving an errored order is an operator action outside this
    /// function's scope.
    pub fn validate_transition(&self, next: OrderState) -> Result<(), OrderError> {
        let allowed: &[OrderState] = match self {
            OrderState::Pending => &[OrderState::Submitting, OrderState::Cancelled],
            OrderState::Submitting => &[
                OrderState::Open,
                OrderState::Filled,
                OrderState::Rejected,
                OrderState::Error,
            ],
            OrderState::Open => &[
                OrderState::Partial,
                OrderState::Filled,
                OrderState::Cancelling,
                OrderState::Error,
            ],
            OrderState::Partial => &[
                OrderState::Filled,
                OrderState::Cancelling,
                OrderState::Error,
            ],
            OrderState::Cancelling => {
                &[OrderState::Filled, OrderState::Cancelled, OrderState::Error]
            }
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Error => {
                &[]
            }
        };

        if allowed.contains(&next) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

/// An order this engine has submitted or is about to submit, tracked end to
/// end from local creation through fill or cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub id: Uuid,
    pub bot_id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub state: OrderState,
    pub grid_level: Option<i32>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedOrder {
    pub fn new(
        bot_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        grid_level: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            client_order_id: format!("gb-{}", id.simple()),
            id,
            bot_id: bot_id.into(),
            exchange_order_id: None,
            symbol: symbol.into(),
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            fee: None,
            fee_asset: None,
            state: OrderState::Pending,
            grid_level,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: OrderState) -> Result<(), OrderError> {
        self.state.validate_transition(next)?;
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a monotonic fill update: filled_quantity only ever grows, so
    /// a WS update racing a REST sync converges to the same result either way.
    pub fn apply_fill(&mut self, filled_quantity: Decimal, average_fill_price: Option<Decimal>) {
        self.filled_quantity = self.filled_quantity.max(filled_quantity);
        if let Some(price) = average_fill_price {
            self.average_fill_price = Some(price);
        }
        self.updated_at = Utc::now();
    }

    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    pub fn is_fully_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    /// True iff this order is in a non-terminal state, i.e. still eligible
    /// to collide with another order on the same (bot, side, grid_level).
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ManagedOrder {
        ManagedOrder::new(
            "bot-1",
            "BTC/USDT",
            OrderSide::Buy,
            OrderType::Limit,
            Some(Decimal::new(60000, 0)),
            Decimal::new(1, 2),
            Some(0),
        )
    }

    #[test]
    fn pending_to_submitting_is_allowed() {
        let mut order = sample();
        assert!(order.transition(OrderState::Submitting).is_ok());
        assert_eq!(order.state, OrderState::Submitting);
    }

    #[test]
    fn filled_is_terminal() {
        let mut order = sample();
        order.transition(OrderState::Submitting).unwrap();
        order.transition(OrderState::Filled).unwrap();
        assert!(order.state.is_terminal());
        assert!(order.transition(OrderState::Open).is_err());
    }

    #[test]
    fn cannot_skip_to_filled_from_pending() {
        let mut order = sample();
        let err = order.transition(OrderState::Filled).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn open_can_partially_fill_then_fill() {
        let mut order = sample();
        order.transition(OrderState::Submitting).unwrap();
        order.transition(OrderState::Open).unwrap();
        order.transition(OrderState::Partial).unwrap();
        order.transition(OrderState::Filled).unwrap();
        assert_eq!(order.state, OrderState::Filled);
    }

    #[test]
    fn cancelling_can_resolve_to_filled_when_a_fill_races_the_cancel() {
        let mut order = sample();
        order.transition(OrderState::Submitting).unwrap();
        order.transition(OrderState::Open).unwrap();
        order.transition(OrderState::Cancelling).unwrap();
        assert!(order.transition(OrderState::Filled).is_ok());
    }

    #[test]
    fn error_has_no_outgoing_transition() {
        let mut order = sample();
        order.transition(OrderState::Submitting).unwrap();
        order.transition(OrderState::Error).unwrap();
        assert!(order.transition(OrderState::Cancelled).is_err());
    }

    #[test]
    fn invalid_transition_leaves_order_untouched() {
        let mut order = sample();
        order.transition(OrderState::Submitting).unwrap();
        order.transition(OrderState::Filled).unwrap();
        let before = order.state;
        assert!(order.transition(OrderState::Submitting).is_err());
        assert_eq!(order.state, before);
    }

    #[test]
    fn fill_updates_are_monotonic() {
        let mut order = sample();
        order.apply_fill(Decimal::new(4, 3), Some(Decimal::new(60010, 0)));
        order.apply_fill(Decimal::new(2, 3), Some(Decimal::new(60020, 0)));
        assert_eq!(order.filled_quantity, Decimal::new(4, 3));
    }
}
