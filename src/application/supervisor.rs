use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::engine::Engine;
use crate::application::order_manager::OrderManager;
use crate::application::reconciler::Reconciler;
use crate::domain::bot::{Bot, BotStatus};
use crate::domain::repositories::{BotEventRepository, BotRepository};

/// Built per bot by whatever wires up exchange credentials, repositories and
/// the kv store; the supervisor only knows how to ask for one and how to
/// drive it.
pub struct BotRuntime {
    pub engine: Arc<Engine>,
    pub order_manager: Arc<OrderManager>,
    pub reconciler: Arc<Reconciler>,
}

#[async_trait]
pub trait BotRuntimeFactory: Send + Sync {
    async fn build(&self, bot: &Bot) -> anyhow::Result<BotRuntime>;
}

struct RunningBot {
    engine_task: JoinHandle<()>,
    reconciler_task: JoinHandle<()>,
}

/// Polls the bot table for desired state and keeps one loop task per
/// RUNNING/STARTING bot alive. A bot whose task panics or returns is marked
/// ERROR and is not automatically restarted; an operator has to clear it.
pub struct Supervisor {
    bots: Arc<dyn BotRepository>,
    events: Arc<dyn BotEventRepository>,
    factory: Arc<dyn BotRuntimeFactory>,
    poll_interval: Duration,
    tick_interval: Duration,
    reconcile_interval: Duration,
    running: Mutex<HashMap<String, RunningBot>>,
}

impl Supervisor {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        events: Arc<dyn BotEventRepository>,
        factory: Arc<dyn BotRuntimeFactory>,
        poll_interval: Duration,
        tick_interval: Duration,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            bots,
            events,
            factory,
            poll_interval,
            tick_interval,
            reconcile_interval,
            running: Mutex::new(HashMap::new()),
        }
    }

    async fn log_event(&self, bot_id: &str, kind: &str, message: &str) {
        if let Err(e) = self.events.record(bot_id, kind, message).await {
            warn!(bot_id, "failed to record bot event: {e}");
        }
    }

    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile().await {
                error!("supervisor reconcile pass failed: {e}");
            }
        }
    }

    /// One pass: reap dead tasks, start bots that want a loop and don't have
    /// one, stop bots that are STOPPING. Also the mechanism by which RUNNING
    /// bots left over from a prior process are rehydrated on boot, since the
    /// first pass sees them as "wants a loop, has no task" just like any
    /// other start.
    async fn reconcile(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;

        let mut dead = Vec::new();
        for (bot_id, rb) in running.iter() {
            if rb.engine_task.is_finished() {
                dead.push(bot_id.clone());
            }
        }
        for bot_id in dead {
            running.remove(&bot_id);
            warn!(bot_id = %bot_id, "bot loop task ended unexpectedly, marking error");
            self.log_event(&bot_id, "error", "loop task ended unexpectedly").await;
            self.bots
                .update_status(&bot_id, BotStatus::Error, Some("loop task ended unexpectedly"))
                .await?;
        }

        let mut wanting = self.bots.find_by_status(BotStatus::Running).await?;
        wanting.extend(self.bots.find_by_status(BotStatus::Starting).await?);

        for bot in wanting {
            if running.contains_key(&bot.id) {
                continue;
            }
            info!(bot_id = %bot.id, "starting bot loop");
            match self.start_bot(&bot).await {
                Ok(rb) => {
                    running.insert(bot.id.clone(), rb);
                    self.bots.update_status(&bot.id, BotStatus::Running, None).await?;
                    self.log_event(&bot.id, "start", "bot loop started").await;
                }
                Err(e) => {
                    error!(bot_id = %bot.id, "failed to start bot: {e}");
                    self.log_event(&bot.id, "error", &format!("failed to start: {e}")).await;
                    self.bots
                        .update_status(&bot.id, BotStatus::Error, Some(&e.to_string()))
                        .await?;
                }
            }
        }

        let stopping = self.bots.find_by_status(BotStatus::Stopping).await?;
        for bot in stopping {
            if let Some(rb) = running.remove(&bot.id) {
                rb.engine_task.abort();
                rb.reconciler_task.abort();
            }
            self.bots.update_status(&bot.id, BotStatus::Stopped, None).await?;
            self.log_event(&bot.id, "stop", "bot loop stopped").await;
            info!(bot_id = %bot.id, "bot stopped");
        }

        Ok(())
    }

    async fn start_bot(&self, bot: &Bot) -> anyhow::Result<RunningBot> {
        let runtime = self.factory.build(bot).await?;
        runtime.order_manager.load_from_db().await?;

        let engine_task = tokio::spawn(run_bot_loop(
            bot.id.clone(),
            runtime.engine.clone(),
            self.bots.clone(),
            self.events.clone(),
            self.tick_interval,
        ));
        let reconciler_task = tokio::spawn(crate::application::reconciler::run_forever(
            runtime.reconciler.clone(),
            self.reconcile_interval,
        ));

        Ok(RunningBot {
            engine_task,
            reconciler_task,
        })
    }
}

async fn run_bot_loop(
    bot_id: String,
    engine: Arc<Engine>,
    bots: Arc<dyn BotRepository>,
    events: Arc<dyn BotEventRepository>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = engine.tick().await {
            error!(bot_id = %bot_id, "bot tick failed, stopping loop: {e}");
            let _ = events.record(&bot_id, "error", &format!("tick failed: {e}")).await;
            let _ = bots.update_status(&bot_id, BotStatus::Error, Some(&e.to_string())).await;
            return;
        }
    }
}
