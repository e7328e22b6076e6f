//! Prometheus metrics for the bot execution core. All metrics use the
//! `gridbot_` prefix.

use prometheus::{CounterVec, GaugeVec, Opts, Registry, TextEncoder, core::GenericGaugeVec};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub bots_running: GenericGaugeVec<prometheus::core::AtomicF64>,
    pub orders_total: CounterVec,
    pub ticks_total: CounterVec,
    pub realized_pnl_usd: GenericGaugeVec<prometheus::core::AtomicF64>,
    pub circuit_breaker_state: GenericGaugeVec<prometheus::core::AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let bots_running = GaugeVec::new(
            Opts::new("gridbot_bots_running", "1 if the bot's loop task is live"),
            &["bot_id"],
        )?;
        registry.register(Box::new(bots_running.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("gridbot_orders_total", "Orders submitted, by bot and terminal state"),
            &["bot_id", "state"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let ticks_total = CounterVec::new(
            Opts::new("gridbot_ticks_total", "Engine ticks run, by bot and outcome"),
            &["bot_id", "outcome"],
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let realized_pnl_usd = GaugeVec::new(
            Opts::new("gridbot_realized_pnl_usd", "Realized P&L per bot"),
            &["bot_id"],
        )?;
        registry.register(Box::new(realized_pnl_usd.clone()))?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "gridbot_circuit_breaker_state",
                "0=closed, 1=half_open, 2=open, per bot",
            ),
            &["bot_id"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            bots_running,
            orders_total,
            ticks_total,
            realized_pnl_usd,
            circuit_breaker_state,
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        Ok(encoder.encode_to_string(&families)?)
    }
}
