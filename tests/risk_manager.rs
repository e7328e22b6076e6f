mod support;

use std::sync::Arc;

use gridbot_core::application::risk_manager::RiskManager;
use gridbot_core::domain::risk::{RiskAction, RiskConfig};
use rust_decimal_macros::dec;
use support::InMemoryRiskStateRepository;

#[tokio::test]
async fn first_update_initializes_state_and_takes_no_action() {
    let repository = Arc::new(InMemoryRiskStateRepository::new());
    let manager = RiskManager::new("bot-1", repository.clone(), RiskConfig::default());

    let decision = manager.update(dec!(50000), dec!(10000), dec!(5000), dec!(10000)).await.unwrap();
    assert_eq!(decision.action, RiskAction::None);
    assert!(repository.load("bot-1").await.unwrap().is_some());
}

#[tokio::test]
async fn a_sharp_drawdown_pauses_the_bot_and_blocks_new_orders() {
    let repository = Arc::new(InMemoryRiskStateRepository::new());
    let manager = RiskManager::new("bot-1", repository.clone(), RiskConfig::default());

    manager.update(dec!(50000), dec!(10000), dec!(5000), dec!(10000)).await.unwrap();
    let decision = manager.update(dec!(50000), dec!(9600), dec!(5000), dec!(10000)).await.unwrap();

    assert_eq!(decision.action, RiskAction::Pause);
    assert!(manager.check_order().await.unwrap().is_err());
}
