mod support;

use std::sync::Arc;

use gridbot_core::application::circuit_breaker::CircuitBreaker;
use gridbot_core::application::engine::{Engine, TickOutcome};
use gridbot_core::application::metrics::Metrics;
use gridbot_core::application::order_manager::OrderManager;
use gridbot_core::application::risk_manager::RiskManager;
use gridbot_core::application::strategies::grid::GridStrategy;
use gridbot_core::config::ExchangeConfig;
use gridbot_core::domain::bot::StrategyKind;
use gridbot_core::domain::circuit::CircuitConfig;
use gridbot_core::domain::risk::RiskConfig;
use gridbot_core::domain::strategy::GridConfig;
use gridbot_core::domain::trading::types::{Balance, Ticker};
use gridbot_core::infrastructure::kv::InMemoryKvStore;
use gridbot_core::infrastructure::mock::MockExchangeAdapter;
use rust_decimal_macros::dec;
use support::{sample_bot, InMemoryBotRepository, InMemoryOrderRepository, InMemoryRiskStateRepository};

#[tokio::test]
async fn tick_submits_grid_buy_orders_within_capital_limits() {
    let grid_config = GridConfig {
        lower_price: dec!(90),
        upper_price: dec!(110),
        grid_count: 2,
        investment: dec!(200),
        dynamic_range: None,
    };
    let bot = sample_bot("bot-1", StrategyKind::Grid, serde_json::to_value(grid_config).unwrap());

    let adapter = Arc::new(MockExchangeAdapter::new());
    adapter
        .set_ticker(Ticker {
            last: dec!(100),
            bid: dec!(99),
            ask: dec!(101),
        })
        .await;
    adapter
        .set_balance(Balance {
            free: [("USDT".to_string(), dec!(10000))].into_iter().collect(),
            total: [("USDT".to_string(), dec!(10000))].into_iter().collect(),
        })
        .await;

    let order_repository = Arc::new(InMemoryOrderRepository::new());
    let bot_repository = Arc::new(InMemoryBotRepository::new());
    bot_repository.insert(bot.clone());
    let risk_repository = Arc::new(InMemoryRiskStateRepository::new());
    let kv = Arc::new(InMemoryKvStore::new());

    let order_manager = Arc::new(OrderManager::new(
        "bot-1",
        adapter.clone(),
        order_repository,
        ExchangeConfig {
            request_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 100,
        },
    ));
    let circuit = Arc::new(CircuitBreaker::new("bot-1", kv, CircuitConfig::default()));
    let risk = Arc::new(RiskManager::new("bot-1", risk_repository, RiskConfig::default()));
    let strategy = Box::new(GridStrategy::new(grid_config));
    let metrics = Metrics::new().unwrap();

    let engine = Engine::new(
        &bot,
        "BTC/USDT",
        adapter,
        order_manager.clone(),
        circuit,
        risk,
        strategy,
        bot_repository,
        metrics,
        grid_config.investment,
        None,
    );

    let outcome = engine.tick().await.unwrap();
    match outcome {
        TickOutcome::Submitted(count) => assert!(count > 0, "expected at least one grid order to be submitted"),
        _ => panic!("expected orders to be submitted on the first tick"),
    }
}
