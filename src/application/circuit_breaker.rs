use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::circuit::{check_order_allowed, CircuitConfig, CircuitCounters, CircuitState, TripReason};
use crate::domain::errors::CircuitError;
use crate::domain::ports::KvStore;

mod keys {
    pub fn state(bot_id: &str) -> String {
        format!("cb:state:{bot_id}")
    }
    pub fn orders(bot_id: &str) -> String {
        format!("cb:orders:{bot_id}")
    }
    pub fn loss(bot_id: &str) -> String {
        format!("cb:loss:{bot_id}")
    }
    pub fn cooldown(bot_id: &str) -> String {
        format!("cb:cooldown:{bot_id}")
    }
    pub fn reason(bot_id: &str) -> String {
        format!("cb:reason:{bot_id}")
    }
    pub fn half_open(bot_id: &str) -> String {
        format!("cb:half_open:{bot_id}")
    }
}

/// Distributed per-bot circuit breaker backed by a key-value store. Only
/// this type writes `cb:*` keys; all counters are atomic increments so
/// multiple bot processes sharing a store never race on read-modify-write.
pub struct CircuitBreaker {
    bot_id: String,
    kv: Arc<dyn KvStore>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(bot_id: impl Into<String>, kv: Arc<dyn KvStore>, config: CircuitConfig) -> Self {
        Self {
            bot_id: bot_id.into(),
            kv,
            config,
        }
    }

    async fn read_counters(&self) -> anyhow::Result<CircuitCounters> {
        let state_raw = self.kv.get(&keys::state(&self.bot_id)).await?;
        let cooldown_active = self.kv.exists(&keys::cooldown(&self.bot_id)).await?;

        let mut state = match state_raw.as_deref() {
            Some("OPEN") => CircuitState::Open,
            Some("HALF_OPEN") => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        };

        if state == CircuitState::Open && !cooldown_active {
            state = CircuitState::HalfOpen;
            self.kv.set(&keys::state(&self.bot_id), "HALF_OPEN").await?;
        }

        let order_count_60s = self
            .kv
            .get(&keys::orders(&self.bot_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let loss_1h = self
            .kv
            .get(&keys::loss(&self.bot_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(Decimal::ZERO);

        let half_open_admitted = self
            .kv
            .get(&keys::half_open(&self.bot_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(CircuitCounters {
            state,
            order_count_60s,
            loss_1h,
            cooldown_active,
            half_open_admitted,
        })
    }

    pub async fn get_state(&self) -> anyhow::Result<CircuitState> {
        Ok(self.read_counters().await?.state)
    }

    /// Evaluates the gates and, on a tripping gate, persists OPEN plus a
    /// fresh cooldown TTL before surfacing the denial.
    pub async fn check_order_allowed(
        &self,
        order_price: Option<Decimal>,
        current_price: Decimal,
        investment: Decimal,
    ) -> anyhow::Result<Result<(), CircuitError>> {
        let counters = self.read_counters().await?;
        match check_order_allowed(&self.config, &counters, order_price, current_price, investment) {
            Ok(()) => Ok(Ok(())),
            Err(err @ (CircuitError::RateExceeded { .. } | CircuitError::LossLimitExceeded { .. })) => {
                let reason = match &err {
                    CircuitError::RateExceeded { .. } => TripReason::OrderRateExceeded,
                    _ => TripReason::LossLimitExceeded,
                };
                self.trip(reason).await?;
                Ok(Err(err))
            }
            Err(other) => Ok(Err(other)),
        }
    }

    async fn trip(&self, reason: TripReason) -> anyhow::Result<()> {
        self.kv.set(&keys::state(&self.bot_id), "OPEN").await?;
        self.kv
            .set_with_ttl(&keys::cooldown(&self.bot_id), "1", self.config.cooldown_seconds)
            .await?;
        self.kv
            .set_with_ttl(&keys::reason(&self.bot_id), reason.as_str(), self.config.cooldown_seconds)
            .await?;
        self.kv.delete(&keys::half_open(&self.bot_id)).await?;
        Ok(())
    }

    pub async fn record_order_placed(&self) -> anyhow::Result<()> {
        self.kv.incr(&keys::orders(&self.bot_id), Some(60)).await?;
        if self.get_state().await? == CircuitState::HalfOpen {
            self.kv
                .incr(&keys::half_open(&self.bot_id), Some(self.config.cooldown_seconds))
                .await?;
        }
        Ok(())
    }

    /// Only losses are recorded; `record_pnl(positive)` is a no-op.
    pub async fn record_pnl(&self, pnl: Decimal) -> anyhow::Result<()> {
        if pnl < Decimal::ZERO {
            self.kv
                .incrbyfloat(&keys::loss(&self.bot_id), pnl.abs(), Some(3600))
                .await?;
        }
        Ok(())
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        self.kv.delete(&keys::state(&self.bot_id)).await?;
        self.kv.delete(&keys::cooldown(&self.bot_id)).await?;
        self.kv.delete(&keys::reason(&self.bot_id)).await?;
        self.kv.delete(&keys::half_open(&self.bot_id)).await?;
        Ok(())
    }
}
