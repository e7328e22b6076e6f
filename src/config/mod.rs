//! Configuration loading from environment variables, organized by domain:
//! persistence, exchange timeouts, circuit breaker, risk manager, and
//! engine/supervisor tick cadence.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::domain::circuit::CircuitConfig;
use crate::domain::risk::RiskConfig;

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub kv_url: String,
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval_seconds: u64,
    pub supervisor_interval_seconds: u64,
    pub reconciler_interval_seconds: u64,
    pub max_reconnect_attempts: u32,
    pub notifier_module: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub persistence: PersistenceConfig,
    pub exchange: ExchangeConfig,
    pub circuit: CircuitConfig,
    pub risk: RiskConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            persistence: PersistenceConfig {
                database_url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://gridbot.db".to_string()),
                kv_url: env::var("KV_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            exchange: ExchangeConfig {
                request_timeout_ms: parse_u64("EXCHANGE_REQUEST_TIMEOUT_MS", 10_000)?,
                max_retries: parse_u32("EXCHANGE_MAX_RETRIES", 3)?,
                retry_base_delay_ms: parse_u64("EXCHANGE_RETRY_BASE_DELAY_MS", 500)?,
                retry_max_delay_ms: parse_u64("EXCHANGE_RETRY_MAX_DELAY_MS", 30_000)?,
            },
            circuit: CircuitConfig {
                max_orders_per_minute: parse_u64("CIRCUIT_MAX_ORDERS_PER_MINUTE", 50)?,
                max_loss_percent_per_hour: parse_decimal("CIRCUIT_MAX_LOSS_PERCENT_PER_HOUR", "5.0")?,
                max_price_deviation_percent: parse_decimal("CIRCUIT_MAX_PRICE_DEVIATION_PERCENT", "10.0")?,
                cooldown_seconds: parse_u64("CIRCUIT_COOLDOWN_SECONDS", 300)?,
                half_open_orders: parse_u32("CIRCUIT_HALF_OPEN_ORDERS", 3)?,
            },
            risk: RiskConfig {
                daily_stop_percent: parse_decimal("RISK_DAILY_STOP_PERCENT", "4.0")?,
                weekly_stop_percent: parse_decimal("RISK_WEEKLY_STOP_PERCENT", "10.0")?,
                monthly_stop_percent: parse_decimal("RISK_MONTHLY_STOP_PERCENT", "20.0")?,
                daily_pause_hours: parse_i64("RISK_DAILY_PAUSE_HOURS", 24)?,
                two_step_wait_minutes: parse_i64("RISK_TWO_STEP_WAIT_MINUTES", 30)?,
                trailing_percent: parse_decimal("RISK_TRAILING_PERCENT", "3.0")?,
                trailing_wait_minutes: parse_i64("RISK_TRAILING_WAIT_MINUTES", 30)?,
                active_capital_percent: parse_decimal("RISK_ACTIVE_CAPITAL_PERCENT", "60.0")?,
                reserve_capital_percent: parse_decimal("RISK_RESERVE_CAPITAL_PERCENT", "40.0")?,
                reinforcement_levels_percent: &[8, 15],
            },
            engine: EngineConfig {
                tick_interval_seconds: parse_u64("TICK_INTERVAL_SECONDS", 1)?,
                supervisor_interval_seconds: parse_u64("SUPERVISOR_INTERVAL_SECONDS", 5)?,
                reconciler_interval_seconds: parse_u64("RECONCILER_INTERVAL_SECONDS", 300)?,
                max_reconnect_attempts: parse_u32("MAX_RECONNECT_ATTEMPTS", 10)?,
                notifier_module: env::var("NOTIFIER_MODULE").ok(),
            },
        })
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("failed to parse {key}"))
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u32>()
        .context(format!("failed to parse {key}"))
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i64>()
        .context(format!("failed to parse {key}"))
}

fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).context(format!("failed to parse {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_environment() {
        let config = Config::from_env().expect("defaults must parse");
        assert_eq!(config.engine.tick_interval_seconds, 1);
        assert_eq!(config.circuit.max_orders_per_minute, 50);
        assert_eq!(config.risk.daily_stop_percent, Decimal::new(4, 0));
    }
}
