pub mod bot_event_repository;
pub mod bot_repository;
pub mod order_repository;
pub mod risk_state_repository;
pub mod trade_repository;

pub use bot_event_repository::SqliteBotEventRepository;
pub use bot_repository::SqliteBotRepository;
pub use order_repository::SqliteOrderRepository;
pub use risk_state_repository::SqliteRiskStateRepository;
pub use trade_repository::SqliteTradeRepository;
