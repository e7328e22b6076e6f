use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::notifier::build_notifier;
use crate::application::order_manager::OrderManager;
use crate::application::risk_manager::RiskManager;
use crate::application::strategies::StrategyEngine;
use crate::domain::bot::Bot;
use crate::domain::ports::{ExchangeAdapter, Notifier};
use crate::domain::repositories::BotRepository;
use crate::domain::strategy::{OpenOrderView, StrategyOrder};
use crate::domain::trading::types::OrderSide;

pub enum TickOutcome {
    Submitted(usize),
    SkippedNoTicker,
    CircuitOpenStopped,
    RiskLiquidated,
}

/// Drives one bot's control loop: fetch price + balance, ask the strategy
/// for candidate orders, filter by capital and exchange rules, submit.
pub struct Engine {
    bot_id: String,
    user_id: String,
    symbol: String,
    adapter: Arc<dyn ExchangeAdapter>,
    order_manager: Arc<OrderManager>,
    circuit: Arc<CircuitBreaker>,
    risk: Arc<RiskManager>,
    strategy: Mutex<Box<dyn StrategyEngine>>,
    notifier: Arc<dyn Notifier>,
    bot_repository: Arc<dyn BotRepository>,
    metrics: Metrics,
    investment: Decimal,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot: &Bot,
        symbol: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        order_manager: Arc<OrderManager>,
        circuit: Arc<CircuitBreaker>,
        risk: Arc<RiskManager>,
        strategy: Box<dyn StrategyEngine>,
        bot_repository: Arc<dyn BotRepository>,
        metrics: Metrics,
        investment: Decimal,
        notifier_module: Option<&str>,
    ) -> Self {
        Self {
            bot_id: bot.id.clone(),
            user_id: bot.user_id.clone(),
            symbol: symbol.into(),
            adapter,
            order_manager,
            circuit,
            risk,
            strategy: Mutex::new(strategy),
            notifier: build_notifier(notifier_module),
            bot_repository,
            metrics,
            investment,
        }
    }

    pub async fn tick(&self) -> anyhow::Result<TickOutcome> {
        if self.circuit.get_state().await? == crate::domain::circuit::CircuitState::Open {
            self.order_manager.cancel_all().await?;
            self.metrics
                .ticks_total
                .with_label_values(&[&self.bot_id, "circuit_open"])
                .inc();
            return Ok(TickOutcome::CircuitOpenStopped);
        }

        let ticker = match self.adapter.fetch_ticker(&self.symbol).await {
            Ok(t) => t,
            Err(e) => {
                warn!(bot_id = %self.bot_id, "fetch_ticker failed, skipping tick: {e}");
                self.metrics
                    .ticks_total
                    .with_label_values(&[&self.bot_id, "no_ticker"])
                    .inc();
                return Ok(TickOutcome::SkippedNoTicker);
            }
        };
        let current_price = ticker.last;

        let balance = self.adapter.fetch_balance().await.ok();
        let metadata = self.adapter.market_metadata(&self.symbol).await.ok();

        let (base_asset, quote_asset) = crate::domain::trading::types::split_symbol(&self.symbol)
            .unwrap_or((self.symbol.as_str(), "USDT"));

        if let Some(balance) = &balance {
            let equity = balance.total_of(quote_asset) + balance.total_of(base_asset) * current_price;
            let free_quote = balance.free_of(quote_asset);
            let decision = self
                .risk
                .update(current_price, equity, free_quote, self.investment)
                .await?;
            if decision.action == crate::domain::risk::RiskAction::Liquidate {
                self.order_manager.cancel_all().await?;
                return Ok(TickOutcome::RiskLiquidated);
            }
        }

        let open_orders = self.order_manager.list_open().await?;
        let open_views: Vec<OpenOrderView> = open_orders
            .iter()
            .map(|o| OpenOrderView {
                side: o.side,
                grid_level: o.grid_level,
            })
            .collect();

        let candidates = {
            let mut strategy = self.strategy.lock().await;

            if let Some((timeframe, period)) = strategy.candle_requirement() {
                match self.adapter.fetch_ohlcv(&self.symbol, timeframe, None, Some(period + 1)).await {
                    Ok(candles) => strategy.apply_candles(&candles, current_price, chrono::Utc::now()),
                    Err(e) => warn!(bot_id = %self.bot_id, "fetch_ohlcv failed, skipping regrid check: {e}"),
                }
            }

            strategy.calculate_orders(current_price, &open_views)
        };

        let filtered = self.filter_candidates(candidates, current_price, balance.as_ref(), metadata.as_ref(), base_asset, quote_asset);

        let mut submitted = 0usize;
        for candidate in filtered {
            if let Some(level) = candidate.grid_level {
                if self.order_manager.has_active_grid_order(candidate.side, level).await? {
                    continue;
                }
            }

            let allowed = self
                .circuit
                .check_order_allowed(candidate.price, current_price, self.investment)
                .await?;
            if allowed.is_err() {
                continue;
            }

            if self.risk.check_order().await?.is_err() {
                continue;
            }

            match self
                .order_manager
                .submit_order(
                    &self.symbol,
                    candidate.side,
                    candidate.order_type,
                    candidate.price,
                    candidate.quantity,
                    candidate.grid_level,
                )
                .await
            {
                Ok(_) => {
                    self.circuit.record_order_placed().await?;
                    self.metrics
                        .orders_total
                        .with_label_values(&[&self.bot_id, "submitted"])
                        .inc();
                    submitted += 1;
                }
                Err(e) => error!(bot_id = %self.bot_id, "order submission failed: {e}"),
            }
        }

        self.metrics
            .ticks_total
            .with_label_values(&[&self.bot_id, "ok"])
            .inc();
        Ok(TickOutcome::Submitted(submitted))
    }

    /// Sorts closest-to-price first, rounds to step size, and caps by
    /// available balance; drops anything left below exchange minimums.
    fn filter_candidates(
        &self,
        mut candidates: Vec<StrategyOrder>,
        current_price: Decimal,
        balance: Option<&crate::domain::trading::types::Balance>,
        metadata: Option<&crate::domain::trading::types::MarketMetadata>,
        base_asset: &str,
        quote_asset: &str,
    ) -> Vec<StrategyOrder> {
        candidates.sort_by_key(|o| (o.price.unwrap_or(current_price) - current_price).abs());

        let mut free_quote = balance.map(|b| b.free_of(quote_asset));
        let mut free_base = balance.map(|b| b.free_of(base_asset));
        let mut survivors = Vec::new();

        for mut candidate in candidates {
            if let Some(meta) = metadata {
                if meta.step_size > Decimal::ZERO {
                    candidate.quantity = (candidate.quantity / meta.step_size).floor() * meta.step_size;
                }
            }

            match candidate.side {
                OrderSide::Buy => {
                    if let Some(quote) = free_quote.as_mut() {
                        let price = candidate.price.unwrap_or(current_price);
                        let notional = price * candidate.quantity;
                        if let Some(meta) = metadata {
                            if candidate.quantity < meta.min_qty || notional < meta.min_notional {
                                continue;
                            }
                        }
                        if notional > *quote {
                            continue;
                        }
                        *quote -= notional;
                    }
                }
                OrderSide::Sell => {
                    if let Some(base) = free_base.as_mut() {
                        if candidate.quantity > *base {
                            candidate.quantity = *base;
                            if let Some(meta) = metadata {
                                candidate.quantity = (candidate.quantity / meta.step_size).floor() * meta.step_size;
                            }
                        }
                        if let Some(meta) = metadata {
                            if candidate.quantity < meta.min_qty {
                                continue;
                            }
                        }
                        *base -= candidate.quantity;
                    }
                }
            }

            survivors.push(candidate);
        }

        survivors
    }

    /// Invoked when a `ManagedOrder` transitions to FILLED.
    pub async fn handle_order_filled(&self, order: &crate::domain::order::ManagedOrder) -> anyhow::Result<()> {
        let fill_price = order.average_fill_price.unwrap_or(order.price.unwrap_or_default());
        let view = OpenOrderView {
            side: order.side,
            grid_level: order.grid_level,
        };

        let pnl_delta = {
            let mut strategy = self.strategy.lock().await;
            strategy.on_order_filled(&view, fill_price, order.filled_quantity)
        };

        self.bot_repository.add_realized_pnl(&self.bot_id, pnl_delta).await?;
        if pnl_delta < Decimal::ZERO {
            self.circuit.record_pnl(pnl_delta).await?;
        }

        self.notifier
            .notify_order_filled(&self.user_id, &self.symbol, order.side, order.filled_quantity, fill_price)
            .await;

        info!(bot_id = %self.bot_id, order_id = %order.id, %pnl_delta, "order filled");
        Ok(())
    }
}
