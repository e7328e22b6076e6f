use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::errors::RiskError;
use crate::domain::repositories::RiskStateRepository;
use crate::domain::risk::{self, RiskAction, RiskConfig, RiskDecision, RiskState};

/// Wraps the pure risk state machine with persistence and event logging.
pub struct RiskManager {
    bot_id: String,
    repository: Arc<dyn RiskStateRepository>,
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(bot_id: impl Into<String>, repository: Arc<dyn RiskStateRepository>, config: RiskConfig) -> Self {
        Self {
            bot_id: bot_id.into(),
            repository,
            config,
        }
    }

    pub async fn update(
        &self,
        current_price: Decimal,
        equity: Decimal,
        free_quote: Decimal,
        investment: Decimal,
    ) -> anyhow::Result<RiskDecision> {
        let now = Utc::now();
        let mut state = match self.repository.load(&self.bot_id).await? {
            Some(state) => state,
            None => RiskState::initialize(now, equity),
        };

        let decision = risk::update_state(&self.config, &mut state, now, current_price, equity, free_quote, investment);

        self.repository.save(&self.bot_id, &state).await?;
        if decision.action != RiskAction::None {
            self.repository
                .record_event(&self.bot_id, action_name(decision.action), decision.reason.as_deref(), now)
                .await?;
        }
        Ok(decision)
    }

    pub async fn check_order(&self) -> anyhow::Result<Result<(), RiskError>> {
        let status = self
            .repository
            .load(&self.bot_id)
            .await?
            .map(|s| s.status)
            .unwrap_or(crate::domain::risk::RiskStatus::Ok);
        Ok(risk::check_order(status))
    }
}

fn action_name(action: RiskAction) -> &'static str {
    match action {
        RiskAction::None => "none",
        RiskAction::Pause => "pause",
        RiskAction::PendingLiquidation => "pending_liquidation",
        RiskAction::Liquidate => "liquidate",
        RiskAction::Resume => "resume",
    }
}
