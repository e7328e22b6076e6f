use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExchangeConfig;
use crate::domain::errors::{OrderError, TransportError};
use crate::domain::order::{ManagedOrder, OrderState};
use crate::domain::ports::{ExchangeAdapter, ExchangeOrderStatus};
use crate::domain::repositories::OrderRepository;
use crate::domain::trading::types::{OrderSide, OrderType};

/// Owns submission, cancellation and reconciliation of a single bot's
/// orders. One instance per running bot loop; the `exchange_id -> id` map
/// is how the user-data stream dispatcher finds the order a WS update
/// belongs to.
pub struct OrderManager {
    bot_id: String,
    adapter: Arc<dyn ExchangeAdapter>,
    repository: Arc<dyn OrderRepository>,
    config: ExchangeConfig,
    exchange_index: RwLock<HashMap<String, Uuid>>,
}

fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(scaled.min(cap_ms))
}

fn map_exchange_status(status: ExchangeOrderStatus, filled: Decimal, quantity: Decimal) -> OrderState {
    match status {
        ExchangeOrderStatus::Open if filled > Decimal::ZERO && filled < quantity => OrderState::Partial,
        ExchangeOrderStatus::Open => OrderState::Open,
        ExchangeOrderStatus::Closed if filled >= quantity => OrderState::Filled,
        ExchangeOrderStatus::Closed => OrderState::Filled,
        ExchangeOrderStatus::Canceled => OrderState::Cancelled,
    }
}

impl OrderManager {
    pub fn new(
        bot_id: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        repository: Arc<dyn OrderRepository>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            adapter,
            repository,
            config,
            exchange_index: RwLock::new(HashMap::new()),
        }
    }

    pub async fn has_active_grid_order(&self, side: OrderSide, grid_level: i32) -> anyhow::Result<bool> {
        self.repository
            .has_active_grid_order(&self.bot_id, side, grid_level)
            .await
    }

    pub async fn list_open(&self) -> anyhow::Result<Vec<ManagedOrder>> {
        self.repository.find_non_terminal(&self.bot_id).await
    }

    /// Cancels every currently non-terminal order for this bot. Called when
    /// the circuit trips open or the bot is stopped.
    pub async fn cancel_all(&self) -> anyhow::Result<()> {
        for order in self.list_open().await? {
            if let Err(e) = self.cancel_order(order.id).await {
                warn!(bot_id = %self.bot_id, order_id = %order.id, "failed to cancel order: {e}");
            }
        }
        Ok(())
    }

    /// Drives PENDING -> SUBMITTING -> {OPEN, FILLED, REJECTED, ERROR} under
    /// a retry budget. A cancelled task never leaves an order SUBMITTING
    /// with no terminal mark: every exit path below writes a resolved state
    /// before returning.
    pub async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        grid_level: Option<i32>,
    ) -> Result<ManagedOrder, OrderError> {
        let mut order = ManagedOrder::new(&self.bot_id, symbol, side, order_type, price, quantity, grid_level);
        order.transition(OrderState::Submitting)?;
        self.repository
            .save(&order)
            .await
            .map_err(|e| OrderError::NotFound(e.to_string()))?;

        loop {
            match self
                .adapter
                .create_order(symbol, side, order_type, quantity, price, &order.client_order_id)
                .await
            {
                Ok(ack) => {
                    order.exchange_order_id = Some(ack.exchange_order_id.clone());
                    let next = match ack.status {
                        ExchangeOrderStatus::Open => OrderState::Open,
                        ExchangeOrderStatus::Closed => OrderState::Filled,
                        ExchangeOrderStatus::Canceled => OrderState::Cancelled,
                    };
                    // SUBMITTING -> CANCELLED isn't in the transition matrix (a create
                    // ack can't have raced a cancel nobody requested yet); fall back to
                    // ERROR like the arms below instead of propagating and leaving the
                    // order stuck SUBMITTING with nothing persisted.
                    if order.transition(next).is_err() {
                        order.last_error = Some(format!("exchange acked create as {:?}", ack.status));
                        order.state = OrderState::Error;
                        self.repository
                            .save(&order)
                            .await
                            .map_err(|e| OrderError::NotFound(e.to_string()))?;
                        return Ok(order);
                    }
                    self.repository
                        .save(&order)
                        .await
                        .map_err(|e| OrderError::NotFound(e.to_string()))?;
                    self.exchange_index.write().await.insert(ack.exchange_order_id, order.id);
                    return Ok(order);
                }
                Err(TransportError::Rejected(reason)) => {
                    order.last_error = Some(reason);
                    order.transition(OrderState::Rejected)?;
                    self.repository
                        .save(&order)
                        .await
                        .map_err(|e| OrderError::NotFound(e.to_string()))?;
                    return Ok(order);
                }
                Err(TransportError::Fatal(reason)) => {
                    order.last_error = Some(reason);
                    order.transition(OrderState::Error)?;
                    self.repository
                        .save(&order)
                        .await
                        .map_err(|e| OrderError::NotFound(e.to_string()))?;
                    return Ok(order);
                }
                Err(retryable) => {
                    order.retry_count += 1;
                    order.last_error = Some(retryable.to_string());
                    if order.retry_count > self.config.max_retries {
                        order.transition(OrderState::Error)?;
                        self.repository
                            .save(&order)
                            .await
                            .map_err(|e| OrderError::NotFound(e.to_string()))?;
                        return Err(OrderError::RetryExhausted {
                            attempts: order.retry_count,
                        });
                    }
                    warn!(
                        bot_id = %self.bot_id,
                        attempt = order.retry_count,
                        "order submission failed, retrying: {}",
                        retryable
                    );
                    tokio::time::sleep(backoff_delay(
                        order.retry_count,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                    ))
                    .await;
                }
            }
        }
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<(), OrderError> {
        let mut order = self
            .repository
            .find_by_id(order_id)
            .await
            .map_err(|e| OrderError::NotFound(e.to_string()))?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        let Some(exchange_id) = order.exchange_order_id.clone() else {
            order.transition(OrderState::Cancelled)?;
            self.repository
                .save(&order)
                .await
                .map_err(|e| OrderError::NotFound(e.to_string()))?;
            return Ok(());
        };

        order.transition(OrderState::Cancelling)?;
        self.repository
            .save(&order)
            .await
            .map_err(|e| OrderError::NotFound(e.to_string()))?;

        match self.adapter.cancel_order(&exchange_id, &order.symbol).await {
            Ok(true) => {
                order.transition(OrderState::Cancelled)?;
            }
            Ok(false) | Err(_) => {
                order.transition(OrderState::Error)?;
            }
        }
        self.repository
            .save(&order)
            .await
            .map_err(|e| OrderError::NotFound(e.to_string()))?;
        Ok(())
    }

    /// Applies a normalized WS/REST update. Idempotent by construction: the
    /// state machine drops any transition that doesn't advance the order,
    /// so a WS fill racing a REST sync converges either way.
    pub async fn handle_update(
        &self,
        exchange_order_id: &str,
        status: ExchangeOrderStatus,
        filled_quantity: Decimal,
        average_fill_price: Option<Decimal>,
        fee: Option<Decimal>,
        fee_asset: Option<String>,
    ) -> anyhow::Result<Option<ManagedOrder>> {
        let Some(&id) = self.exchange_index.read().await.get(exchange_order_id) else {
            return Ok(None);
        };
        let Some(mut order) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };

        order.apply_fill(filled_quantity, average_fill_price);
        if let Some(fee) = fee {
            order.fee = Some(fee);
        }
        if let Some(asset) = fee_asset {
            order.fee_asset = Some(asset);
        }

        let next = map_exchange_status(status, order.filled_quantity, order.quantity);
        if order.state != next {
            if order.state.validate_transition(next).is_ok() {
                order.transition(next)?;
            } else {
                info!(
                    bot_id = %self.bot_id,
                    from = order.state.as_str(),
                    to = next.as_str(),
                    "dropping stale order transition"
                );
            }
        }
        self.repository.save(&order).await?;
        Ok(Some(order))
    }

    pub async fn sync_order_status(&self, order_id: Uuid) -> anyhow::Result<Option<ManagedOrder>> {
        let Some(order) = self.repository.find_by_id(order_id).await? else {
            return Ok(None);
        };
        let Some(exchange_id) = order.exchange_order_id.clone() else {
            return Ok(Some(order));
        };
        match self.adapter.fetch_order(&exchange_id, &order.symbol).await {
            Ok(snapshot) => {
                self.handle_update(
                    &exchange_id,
                    snapshot.status,
                    snapshot.filled_quantity,
                    snapshot.average_fill_price,
                    snapshot.fee,
                    snapshot.fee_asset,
                )
                .await
            }
            Err(e) => {
                error!(bot_id = %self.bot_id, "fetch_order failed during sync: {e}");
                Ok(Some(order))
            }
        }
    }

    /// Rebuilds the in-memory exchange-id map on supervisor rehydrate.
    pub async fn load_from_db(&self) -> anyhow::Result<Vec<ManagedOrder>> {
        let orders = self.repository.find_non_terminal(&self.bot_id).await?;
        let mut index = self.exchange_index.write().await;
        for order in &orders {
            if let Some(exchange_id) = &order.exchange_order_id {
                index.insert(exchange_id.clone(), order.id);
            }
        }
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_capped() {
        assert_eq!(backoff_delay(1, 500, 30_000), Duration::from_millis(1000));
        assert_eq!(backoff_delay(20, 500, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn map_exchange_status_detects_partial_fill() {
        let state = map_exchange_status(ExchangeOrderStatus::Open, Decimal::new(5, 1), Decimal::ONE);
        assert_eq!(state, OrderState::Partial);
    }
}
