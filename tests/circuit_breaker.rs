use std::sync::Arc;

use gridbot_core::application::circuit_breaker::CircuitBreaker;
use gridbot_core::domain::circuit::{CircuitConfig, CircuitState};
use gridbot_core::infrastructure::kv::InMemoryKvStore;
use rust_decimal_macros::dec;

fn config() -> CircuitConfig {
    CircuitConfig {
        max_orders_per_minute: 2,
        max_loss_percent_per_hour: dec!(5.0),
        max_price_deviation_percent: dec!(10.0),
        cooldown_seconds: 300,
        half_open_orders: 3,
    }
}

#[tokio::test]
async fn starts_closed_and_allows_orders() {
    let kv = Arc::new(InMemoryKvStore::new());
    let breaker = CircuitBreaker::new("bot-1", kv, config());

    assert_eq!(breaker.get_state().await.unwrap(), CircuitState::Closed);
    let allowed = breaker.check_order_allowed(Some(dec!(100)), dec!(100), dec!(1000)).await.unwrap();
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn trips_open_after_exceeding_the_order_rate() {
    let kv = Arc::new(InMemoryKvStore::new());
    let breaker = CircuitBreaker::new("bot-1", kv, config());

    breaker.record_order_placed().await.unwrap();
    breaker.record_order_placed().await.unwrap();
    breaker.record_order_placed().await.unwrap();

    let allowed = breaker.check_order_allowed(Some(dec!(100)), dec!(100), dec!(1000)).await.unwrap();
    assert!(allowed.is_err());
    assert_eq!(breaker.get_state().await.unwrap(), CircuitState::Open);
}

#[tokio::test]
async fn reset_clears_a_tripped_breaker() {
    let kv = Arc::new(InMemoryKvStore::new());
    let breaker = CircuitBreaker::new("bot-1", kv, config());

    breaker.record_order_placed().await.unwrap();
    breaker.record_order_placed().await.unwrap();
    breaker.record_order_placed().await.unwrap();
    breaker.check_order_allowed(Some(dec!(100)), dec!(100), dec!(1000)).await.unwrap().unwrap_err();
    assert_eq!(breaker.get_state().await.unwrap(), CircuitState::Open);

    breaker.reset().await.unwrap();
    assert_eq!(breaker.get_state().await.unwrap(), CircuitState::Closed);
}
