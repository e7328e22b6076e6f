use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod shutdown_service;

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::engine::Engine;
use crate::application::metrics::Metrics;
use crate::application::order_manager::OrderManager;
use crate::application::reconciler::Reconciler;
use crate::application::risk_manager::RiskManager;
use crate::application::strategies::dca::DcaStrategy;
use crate::application::strategies::grid::GridStrategy;
use crate::application::strategies::StrategyEngine;
use crate::application::supervisor::{BotRuntime, BotRuntimeFactory, Supervisor};
use crate::application::system::shutdown_service::{EmergencyShutdownConfig, ShutdownService};
use crate::config::Config;
use crate::domain::bot::{Bot, StrategyKind, Venue};
use crate::domain::ports::{CredentialResolver, ExchangeAdapter, KvStore, UserDataEvent, UserDataStream};
use crate::domain::repositories::{BotEventRepository, BotRepository, OrderRepository, RiskStateRepository, TradeRepository};
use crate::domain::strategy::{DcaConfig, DcaState, GridConfig, GridState};
use crate::infrastructure::binance::{BinanceAdapter, BinanceUserDataStream};
use crate::infrastructure::bybit::{BybitAdapter, BybitUserDataStream};
use crate::infrastructure::kv::{InMemoryKvStore, RedisKvStore};
use crate::infrastructure::persistence::repositories::{
    SqliteBotEventRepository, SqliteBotRepository, SqliteOrderRepository, SqliteRiskStateRepository, SqliteTradeRepository,
};
use crate::infrastructure::persistence::Database;

/// Builds per-bot runtimes from venue credentials and the shared repository
/// set, and fans private order updates out to the bots sharing a credential.
pub struct DefaultBotRuntimeFactory {
    credentials: Arc<dyn CredentialResolver>,
    bot_repository: Arc<dyn BotRepository>,
    order_repository: Arc<dyn OrderRepository>,
    trade_repository: Arc<dyn TradeRepository>,
    risk_state_repository: Arc<dyn RiskStateRepository>,
    kv: Arc<dyn KvStore>,
    config: Config,
    metrics: Metrics,
    user_data: UserDataRegistry,
}

impl DefaultBotRuntimeFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        bot_repository: Arc<dyn BotRepository>,
        order_repository: Arc<dyn OrderRepository>,
        trade_repository: Arc<dyn TradeRepository>,
        risk_state_repository: Arc<dyn RiskStateRepository>,
        kv: Arc<dyn KvStore>,
        config: Config,
        metrics: Metrics,
    ) -> Self {
        Self {
            credentials,
            bot_repository,
            order_repository,
            trade_repository,
            risk_state_repository,
            kv,
            config,
            metrics,
            user_data: UserDataRegistry::new(),
        }
    }

    fn build_strategy(bot: &Bot) -> Result<Box<dyn StrategyEngine>> {
        match bot.strategy {
            StrategyKind::Grid => {
                let grid_config: GridConfig =
                    serde_json::from_value(bot.config_json.clone()).context("invalid grid bot config_json")?;
                let strategy = match &bot.strategy_state_json {
                    Some(raw) => {
                        let state: GridState = serde_json::from_value(raw.clone()).context("invalid grid strategy_state_json")?;
                        GridStrategy::from_state(grid_config, state)
                    }
                    None => GridStrategy::new(grid_config),
                };
                Ok(Box::new(strategy))
            }
            StrategyKind::Dca => {
                let dca_config: DcaConfig =
                    serde_json::from_value(bot.config_json.clone()).context("invalid dca bot config_json")?;
                dca_config.validate()?;
                let strategy = match &bot.strategy_state_json {
                    Some(raw) => {
                        let state: DcaState = serde_json::from_value(raw.clone()).context("invalid dca strategy_state_json")?;
                        DcaStrategy::from_state(dca_config, state)
                    }
                    None => DcaStrategy::new(dca_config)?,
                };
                Ok(Box::new(strategy))
            }
        }
    }

    fn investment(bot: &Bot) -> Result<rust_decimal::Decimal> {
        match bot.strategy {
            StrategyKind::Grid => {
                let config: GridConfig = serde_json::from_value(bot.config_json.clone())?;
                Ok(config.investment)
            }
            StrategyKind::Dca => {
                let config: DcaConfig = serde_json::from_value(bot.config_json.clone())?;
                Ok(config.investment)
            }
        }
    }

    fn build_adapter(&self, venue: Venue, api_key: &str, api_secret: &str, testnet: bool) -> Arc<dyn ExchangeAdapter> {
        match venue {
            Venue::Binance => Arc::new(BinanceAdapter::new(api_key, api_secret, testnet)),
            Venue::Bybit => Arc::new(BybitAdapter::new(api_key, api_secret, testnet)),
        }
    }

    fn build_user_data_stream(&self, venue: Venue, api_key: &str, api_secret: &str, testnet: bool) -> Arc<dyn UserDataStream> {
        match venue {
            Venue::Binance => Arc::new(BinanceUserDataStream::new(api_key, testnet)),
            Venue::Bybit => Arc::new(BybitUserDataStream::new(api_key, api_secret, testnet)),
        }
    }
}

#[async_trait]
impl BotRuntimeFactory for DefaultBotRuntimeFactory {
    async fn build(&self, bot: &Bot) -> Result<BotRuntime> {
        let credential = self.credentials.resolve(&bot.credential_id).await?;
        let adapter = self.build_adapter(credential.venue, &credential.api_key, &credential.api_secret, credential.testnet);
        adapter.connect().await.context("exchange adapter failed to connect")?;

        let order_manager = Arc::new(OrderManager::new(
            bot.id.clone(),
            adapter.clone(),
            self.order_repository.clone(),
            self.config.exchange.clone(),
        ));
        let circuit = Arc::new(CircuitBreaker::new(bot.id.clone(), self.kv.clone(), self.config.circuit));
        let risk = Arc::new(RiskManager::new(bot.id.clone(), self.risk_state_repository.clone(), self.config.risk));
        let strategy = Self::build_strategy(bot)?;
        let investment = Self::investment(bot)?;

        let engine = Arc::new(Engine::new(
            bot,
            bot.symbol.clone(),
            adapter.clone(),
            order_manager.clone(),
            circuit,
            risk,
            strategy,
            self.bot_repository.clone(),
            self.metrics.clone(),
            investment,
            self.config.engine.notifier_module.as_deref(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            bot.id.clone(),
            bot.symbol.clone(),
            adapter,
            self.trade_repository.clone(),
            self.bot_repository.clone(),
        ));

        let stream = self.build_user_data_stream(credential.venue, &credential.api_key, &credential.api_secret, credential.testnet);
        self.user_data
            .register(&bot.credential_id, stream, order_manager.clone(), engine.clone())
            .await;

        Ok(BotRuntime {
            engine,
            order_manager,
            reconciler,
        })
    }
}

struct CredentialHandlers {
    handlers: Vec<(Arc<OrderManager>, Arc<Engine>)>,
}

/// One private WebSocket task per credential, shared by every bot trading on
/// it; events are dispatched to whichever bot's `OrderManager` recognizes
/// the exchange order id.
pub struct UserDataRegistry {
    handlers: Arc<Mutex<HashMap<String, CredentialHandlers>>>,
    streams: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl UserDataRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            streams: Mutex::new(HashMap::new()),
        }
    }

    async fn register(&self, credential_id: &str, stream: Arc<dyn UserDataStream>, order_manager: Arc<OrderManager>, engine: Arc<Engine>) {
        {
            let mut handlers = self.handlers.lock().await;
            handlers
                .entry(credential_id.to_string())
                .or_insert_with(|| CredentialHandlers { handlers: Vec::new() })
                .handlers
                .push((order_manager, engine));
        }

        let mut streams = self.streams.lock().await;
        if streams.contains_key(credential_id) {
            return;
        }

        let (tx, rx) = mpsc::channel(256);
        let credential_id_owned = credential_id.to_string();
        let stream_task = tokio::spawn(async move {
            if let Err(e) = stream.run(tx).await {
                error!(credential_id = %credential_id_owned, "user data stream exited: {e}");
            }
        });
        streams.insert(credential_id.to_string(), stream_task);

        let handlers_map = self.handlers.clone();
        let dispatch_credential_id = credential_id.to_string();
        tokio::spawn(dispatch_events(dispatch_credential_id, rx, handlers_map));
    }
}

async fn dispatch_events(
    credential_id: String,
    mut rx: mpsc::Receiver<UserDataEvent>,
    handlers: Arc<Mutex<HashMap<String, CredentialHandlers>>>,
) {
    while let Some(event) = rx.recv().await {
        let UserDataEvent::OrderUpdate {
            exchange_order_id,
            status,
            filled_quantity,
            average_fill_price,
            fee,
            fee_asset,
        } = event
        else {
            continue;
        };

        let snapshot: Vec<(Arc<OrderManager>, Arc<Engine>)> = {
            let guard = handlers.lock().await;
            match guard.get(&credential_id) {
                Some(h) => h.handlers.clone(),
                None => continue,
            }
        };

        for (order_manager, engine) in snapshot {
            match order_manager
                .handle_update(&exchange_order_id, status, filled_quantity, average_fill_price, fee, fee_asset.clone())
                .await
            {
                Ok(Some(order)) => {
                    if order.is_fully_filled() {
                        if let Err(e) = engine.handle_order_filled(&order).await {
                            error!(credential_id = %credential_id, "handle_order_filled failed: {e}");
                        }
                    }
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(credential_id = %credential_id, "order update dispatch failed: {e}");
                }
            }
        }
    }
}

impl Default for UserDataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Composition root: wires persistence, the kv store, and the supervisor
/// from `Config`, and owns graceful shutdown.
pub struct Application {
    config: Config,
    bot_repository: Arc<dyn BotRepository>,
    order_repository: Arc<dyn OrderRepository>,
    supervisor: Arc<Supervisor>,
    shutdown: ShutdownService,
}

pub struct SystemHandle {
    pub supervisor_task: JoinHandle<()>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("building application");

        let database = Database::new(&config.persistence.database_url).await?;
        let kv: Arc<dyn KvStore> = if config.persistence.kv_url.is_empty() {
            Arc::new(InMemoryKvStore::new())
        } else {
            match RedisKvStore::connect(&config.persistence.kv_url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("failed to connect to redis ({e}), falling back to an in-process kv store");
                    Arc::new(InMemoryKvStore::new())
                }
            }
        };

        let bot_repository: Arc<dyn BotRepository> = Arc::new(SqliteBotRepository::new(database.clone()));
        let order_repository: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(database.clone()));
        let trade_repository: Arc<dyn TradeRepository> = Arc::new(SqliteTradeRepository::new(database.clone()));
        let risk_state_repository: Arc<dyn RiskStateRepository> = Arc::new(SqliteRiskStateRepository::new(database.clone()));
        let bot_event_repository: Arc<dyn BotEventRepository> = Arc::new(SqliteBotEventRepository::new(database.clone()));

        let credentials: Arc<dyn CredentialResolver> = Arc::new(crate::infrastructure::credentials::EnvCredentialResolver);
        let metrics = Metrics::new()?;

        let factory = Arc::new(DefaultBotRuntimeFactory::new(
            credentials,
            bot_repository.clone(),
            order_repository.clone(),
            trade_repository,
            risk_state_repository,
            kv,
            config.clone(),
            metrics,
        ));

        let supervisor = Arc::new(Supervisor::new(
            bot_repository.clone(),
            bot_event_repository,
            factory,
            Duration::from_secs(config.engine.supervisor_interval_seconds),
            Duration::from_secs(config.engine.tick_interval_seconds),
            Duration::from_secs(config.engine.reconciler_interval_seconds),
        ));

        let shutdown = ShutdownService::new(order_repository.clone(), bot_repository.clone(), EmergencyShutdownConfig::default());

        Ok(Self {
            config,
            bot_repository,
            order_repository,
            supervisor,
            shutdown,
        })
    }

    pub async fn start(&self) -> Result<SystemHandle> {
        info!(
            tick_interval_s = self.config.engine.tick_interval_seconds,
            supervisor_interval_s = self.config.engine.supervisor_interval_seconds,
            "starting supervisor"
        );
        let supervisor_task = tokio::spawn(Supervisor::run_forever(self.supervisor.clone()));
        Ok(SystemHandle { supervisor_task })
    }

    pub async fn shutdown(&self) {
        self.shutdown.shutdown().await;
    }

    pub fn bot_repository(&self) -> Arc<dyn BotRepository> {
        self.bot_repository.clone()
    }

    pub fn order_repository(&self) -> Arc<dyn OrderRepository> {
        self.order_repository.clone()
    }
}
