use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskStatus {
    Ok,
    Paused,
    PendingLiquidation,
    Liquidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAction {
    None,
    Pause,
    PendingLiquidation,
    Liquidate,
    Resume,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub daily_stop_percent: Decimal,
    pub weekly_stop_percent: Decimal,
    pub monthly_stop_percent: Decimal,
    pub daily_pause_hours: i64,
    pub two_step_wait_minutes: i64,
    pub trailing_percent: Decimal,
    pub trailing_wait_minutes: i64,
    pub active_capital_percent: Decimal,
    pub reserve_capital_percent: Decimal,
    pub reinforcement_levels_percent: &'static [u32],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_stop_percent: Decimal::new(4, 0),
            weekly_stop_percent: Decimal::new(10, 0),
            monthly_stop_percent: Decimal::new(20, 0),
            daily_pause_hours: 24,
            two_step_wait_minutes: 30,
            trailing_percent: Decimal::new(3, 0),
            trailing_wait_minutes: 30,
            active_capital_percent: Decimal::new(60, 0),
            reserve_capital_percent: Decimal::new(40, 0),
            reinforcement_levels_percent: &[8, 15],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownWindow {
    pub start: DateTime<Utc>,
    pub peak: Decimal,
}

impl DrawdownWindow {
    pub fn new(now: DateTime<Utc>, equity: Decimal) -> Self {
        Self {
            start: now,
            peak: equity,
        }
    }

    pub fn drawdown_percent(&self, equity: Decimal) -> Decimal {
        if self.peak.is_zero() {
            return Decimal::ZERO;
        }
        (self.peak - equity) / self.peak * Decimal::ONE_HUNDRED
    }
}

/// Per-bot risk state, persisted in SQL between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub status: RiskStatus,
    pub equity_peak: Decimal,
    pub last_equity: Decimal,
    pub daily: DrawdownWindow,
    pub weekly: DrawdownWindow,
    pub monthly: DrawdownWindow,
    pub paused_until: Option<DateTime<Utc>>,
    pub trailing_pause_until: Option<DateTime<Utc>>,
    pub pending_liquidation_until: Option<DateTime<Utc>>,
    pub pending_reason: Option<String>,
    pub reference_price: Option<Decimal>,
    pub reinforcements_used: u32,
    pub investment_override: Option<Decimal>,
}

impl RiskState {
    pub fn initialize(now: DateTime<Utc>, equity: Decimal) -> Self {
        Self {
            status: RiskStatus::Ok,
            equity_peak: equity,
            last_equity: equity,
            daily: DrawdownWindow::new(now, equity),
            weekly: DrawdownWindow::new(now, equity),
            monthly: DrawdownWindow::new(now, equity),
            paused_until: None,
            trailing_pause_until: None,
            pending_liquidation_until: None,
            pending_reason: None,
            reference_price: None,
            reinforcements_used: 0,
            investment_override: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub status: RiskStatus,
    pub action: RiskAction,
    pub reason: Option<String>,
    pub investment_override: Option<Decimal>,
}

impl RiskDecision {
    fn none(status: RiskStatus) -> Self {
        Self {
            status,
            action: RiskAction::None,
            reason: None,
            investment_override: None,
        }
    }
}

fn roll_window(window: &mut DrawdownWindow, now: DateTime<Utc>, equity: Decimal, period: Duration) {
    if now - window.start >= period {
        *window = DrawdownWindow::new(now, equity);
    } else if equity > window.peak {
        window.peak = equity;
    }
}

/// Runs one tick of the risk state machine. Equity is
/// `quote_total + base_total * current_price`, computed by the caller.
pub fn update_state(
    config: &RiskConfig,
    state: &mut RiskState,
    now: DateTime<Utc>,
    current_price: Decimal,
    equity: Decimal,
    free_quote: Decimal,
    investment: Decimal,
) -> RiskDecision {
    state.last_equity = equity;
    if equity > state.equity_peak {
        state.equity_peak = equity;
    }

    roll_window(&mut state.daily, now, equity, Duration::hours(24));
    roll_window(&mut state.weekly, now, equity, Duration::days(7));
    roll_window(&mut state.monthly, now, equity, Duration::days(30));

    if state.status == RiskStatus::Liquidated {
        return RiskDecision::none(state.status);
    }

    if let Some(until) = state.pending_liquidation_until {
        if now < until {
            return RiskDecision::none(state.status);
        }
        let still_drawn_down = state.monthly.drawdown_percent(equity) >= config.monthly_stop_percent
            || state.weekly.drawdown_percent(equity) >= config.weekly_stop_percent;
        state.pending_liquidation_until = None;
        if still_drawn_down {
            state.status = RiskStatus::Liquidated;
            return RiskDecision {
                status: state.status,
                action: RiskAction::Liquidate,
                reason: state.pending_reason.clone(),
                investment_override: None,
            };
        }
        state.status = RiskStatus::Ok;
        state.pending_reason = None;
        return RiskDecision {
            status: state.status,
            action: RiskAction::Resume,
            reason: None,
            investment_override: None,
        };
    }

    if let Some(until) = state.paused_until {
        if now < until {
            return RiskDecision::none(state.status);
        }
        state.paused_until = None;
        state.status = RiskStatus::Ok;
        return RiskDecision {
            status: state.status,
            action: RiskAction::Resume,
            reason: None,
            investment_override: None,
        };
    }

    if let Some(until) = state.trailing_pause_until {
        if now < until {
            return RiskDecision::none(state.status);
        }
        let recovered =
            equity >= state.equity_peak * (Decimal::ONE_HUNDRED - config.trailing_percent) / Decimal::ONE_HUNDRED;
        if recovered {
            state.trailing_pause_until = None;
            state.status = RiskStatus::Ok;
            return RiskDecision {
                status: state.status,
                action: RiskAction::Resume,
                reason: None,
                investment_override: None,
            };
        }
        state.trailing_pause_until = Some(now + Duration::minutes(config.trailing_wait_minutes));
        return RiskDecision::none(state.status);
    }

    // Worst-first: monthly, then weekly, then daily.
    let monthly_dd = state.monthly.drawdown_percent(equity);
    let weekly_dd = state.weekly.drawdown_percent(equity);
    let daily_dd = state.daily.drawdown_percent(equity);

    if monthly_dd >= config.monthly_stop_percent {
        state.status = RiskStatus::PendingLiquidation;
        state.pending_reason = Some("monthly_stop".to_string());
        state.pending_liquidation_until = Some(now + Duration::minutes(config.two_step_wait_minutes));
        return RiskDecision {
            status: state.status,
            action: RiskAction::PendingLiquidation,
            reason: state.pending_reason.clone(),
            investment_override: None,
        };
    }

    if weekly_dd >= config.weekly_stop_percent {
        state.status = RiskStatus::PendingLiquidation;
        state.pending_reason = Some("weekly_stop".to_string());
        state.pending_liquidation_until = Some(now + Duration::minutes(config.two_step_wait_minutes));
        return RiskDecision {
            status: state.status,
            action: RiskAction::PendingLiquidation,
            reason: state.pending_reason.clone(),
            investment_override: None,
        };
    }

    if daily_dd >= config.daily_stop_percent {
        state.status = RiskStatus::Paused;
        state.paused_until = Some(now + Duration::hours(config.daily_pause_hours));
        return RiskDecision {
            status: state.status,
            action: RiskAction::Pause,
            reason: Some("daily_stop".to_string()),
            investment_override: None,
        };
    }

    let trailing_trigger =
        state.equity_peak * (Decimal::ONE_HUNDRED - config.trailing_percent) / Decimal::ONE_HUNDRED;
    if equity < trailing_trigger {
        state.status = RiskStatus::Paused;
        state.trailing_pause_until = Some(now + Duration::minutes(config.trailing_wait_minutes));
        return RiskDecision {
            status: state.status,
            action: RiskAction::Pause,
            reason: Some("trailing_stop".to_string()),
            investment_override: None,
        };
    }

    if state.reference_price.is_none() {
        state.reference_price = Some(current_price);
    }

    let levels = config.reinforcement_levels_percent;
    if (state.reinforcements_used as usize) < levels.len() {
        let reference = state.reference_price.unwrap_or(current_price);
        let level_percent = Decimal::from(levels[state.reinforcements_used as usize]);
        let trigger = reference * (Decimal::ONE_HUNDRED - level_percent) / Decimal::ONE_HUNDRED;
        if current_price <= trigger {
            let required = investment * config.reserve_capital_percent / Decimal::ONE_HUNDRED
                / Decimal::from(levels.len() as u32);
            if free_quote >= required {
                state.reinforcements_used += 1;
                state.investment_override = Some(required);
                return RiskDecision {
                    status: state.status,
                    action: RiskAction::None,
                    reason: Some("reinforcement".to_string()),
                    investment_override: Some(required),
                };
            }
        }
    }

    RiskDecision::none(state.status)
}

/// Denies orders while the bot is not OK.
pub fn check_order(status: RiskStatus) -> Result<(), crate::domain::errors::RiskError> {
    match status {
        RiskStatus::Ok => Ok(()),
        RiskStatus::Paused => Err(crate::domain::errors::RiskError::Paused {
            reason: "risk window breached".to_string(),
        }),
        RiskStatus::PendingLiquidation => Err(crate::domain::errors::RiskError::PendingLiquidation),
        RiskStatus::Liquidated => Err(crate::domain::errors::RiskError::Liquidated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_drawdown_pauses_for_configured_hours() {
        let config = RiskConfig::default();
        let now = Utc::now();
        let mut state = RiskState::initialize(now, Decimal::new(10000, 0));

        let decision = update_state(
            &config,
            &mut state,
            now,
            Decimal::new(1, 0),
            Decimal::new(9600, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );
        assert_eq!(decision.action, RiskAction::Pause);
        assert_eq!(state.status, RiskStatus::Paused);
        assert!(state.paused_until.is_some());
    }

    #[test]
    fn pause_blocks_further_actions_until_expiry() {
        let config = RiskConfig::default();
        let now = Utc::now();
        let mut state = RiskState::initialize(now, Decimal::new(10000, 0));
        update_state(
            &config,
            &mut state,
            now,
            Decimal::new(1, 0),
            Decimal::new(9600, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );

        let mid_pause = now + Duration::hours(1);
        let decision = update_state(
            &config,
            &mut state,
            mid_pause,
            Decimal::new(1, 0),
            Decimal::new(9700, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );
        assert_eq!(decision.action, RiskAction::None);
    }

    #[test]
    fn resumes_after_daily_pause_expires_above_threshold() {
        let config = RiskConfig::default();
        let now = Utc::now();
        let mut state = RiskState::initialize(now, Decimal::new(10000, 0));
        update_state(
            &config,
            &mut state,
            now,
            Decimal::new(1, 0),
            Decimal::new(9600, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );

        let after = now + Duration::hours(24) + Duration::seconds(1);
        let decision = update_state(
            &config,
            &mut state,
            after,
            Decimal::new(1, 0),
            Decimal::new(9700, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );
        assert_eq!(decision.action, RiskAction::Resume);
        assert_eq!(state.status, RiskStatus::Ok);
    }

    #[test]
    fn monthly_stop_enters_pending_liquidation_then_liquidates_if_still_down() {
        let config = RiskConfig::default();
        let now = Utc::now();
        let mut state = RiskState::initialize(now, Decimal::new(10000, 0));

        let decision = update_state(
            &config,
            &mut state,
            now,
            Decimal::new(1, 0),
            Decimal::new(7900, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );
        assert_eq!(decision.action, RiskAction::PendingLiquidation);

        let after_wait = now + Duration::minutes(31);
        let decision = update_state(
            &config,
            &mut state,
            after_wait,
            Decimal::new(1, 0),
            Decimal::new(7900, 0),
            Decimal::ZERO,
            Decimal::new(10000, 0),
        );
        assert_eq!(decision.action, RiskAction::Liquidate);
        assert_eq!(state.status, RiskStatus::Liquidated);
    }

    #[test]
    fn order_denied_while_paused() {
        assert!(check_order(RiskStatus::Paused).is_err());
        assert!(check_order(RiskStatus::Ok).is_ok());
    }
}
