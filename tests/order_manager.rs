mod support;

use std::sync::Arc;

use gridbot_core::application::order_manager::OrderManager;
use gridbot_core::config::ExchangeConfig;
use gridbot_core::domain::order::OrderState;
use gridbot_core::domain::ports::ExchangeOrderStatus;
use gridbot_core::domain::trading::types::{OrderSide, OrderType, Ticker};
use gridbot_core::infrastructure::mock::MockExchangeAdapter;
use rust_decimal_macros::dec;
use support::InMemoryOrderRepository;

fn exchange_config() -> ExchangeConfig {
    ExchangeConfig {
        request_timeout_ms: 5_000,
        max_retries: 3,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 100,
    }
}

#[tokio::test]
async fn submit_order_fills_immediately_against_the_mock_adapter() {
    let adapter = Arc::new(MockExchangeAdapter::new());
    adapter
        .set_ticker(Ticker {
            last: dec!(50000),
            bid: dec!(49990),
            ask: dec!(50010),
        })
        .await;
    let repository = Arc::new(InMemoryOrderRepository::new());
    let manager = OrderManager::new("bot-1", adapter.clone(), repository.clone(), exchange_config());

    let order = manager
        .submit_order("BTC/USDT", OrderSide::Buy, OrderType::Market, None, dec!(0.01), None)
        .await
        .unwrap();

    assert_eq!(order.state, OrderState::Filled);
    assert!(order.exchange_order_id.is_some());
}

#[tokio::test]
async fn rejected_order_transitions_to_rejected_without_retrying() {
    let adapter = Arc::new(MockExchangeAdapter::new());
    adapter.reject_next_order().await;
    let repository = Arc::new(InMemoryOrderRepository::new());
    let manager = OrderManager::new("bot-1", adapter, repository, exchange_config());

    let order = manager
        .submit_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, Some(dec!(50000)), dec!(0.01), Some(3))
        .await
        .unwrap();

    assert_eq!(order.state, OrderState::Rejected);
}

#[tokio::test]
async fn handle_update_maps_partial_fill_and_is_ignored_for_unknown_orders() {
    let adapter = Arc::new(MockExchangeAdapter::new());
    let repository = Arc::new(InMemoryOrderRepository::new());
    let manager = OrderManager::new("bot-1", adapter, repository, exchange_config());

    let unknown = manager
        .handle_update("not-tracked", ExchangeOrderStatus::Open, dec!(0), None, None, None)
        .await
        .unwrap();
    assert!(unknown.is_none());
}

#[tokio::test]
async fn cancel_order_without_an_exchange_id_resolves_locally() {
    use gridbot_core::domain::order::ManagedOrder;
    use gridbot_core::domain::repositories::OrderRepository;

    let adapter = Arc::new(MockExchangeAdapter::new());
    let repository = Arc::new(InMemoryOrderRepository::new());
    let manager = OrderManager::new("bot-1", adapter, repository.clone(), exchange_config());

    let mut order = ManagedOrder::new("bot-1", "BTC/USDT", OrderSide::Buy, OrderType::Limit, Some(dec!(90)), dec!(1), Some(0));
    order.transition(OrderState::Submitting).unwrap();
    order.transition(OrderState::Open).unwrap();
    repository.save(&order).await.unwrap();

    manager.cancel_order(order.id).await.unwrap();

    let saved = repository.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(saved.state, OrderState::Cancelled);
}
