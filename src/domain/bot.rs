use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Grid,
    Dca,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Grid => "grid",
            StrategyKind::Dca => "dca",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grid" => Ok(StrategyKind::Grid),
            "dca" => Ok(StrategyKind::Dca),
            other => anyhow::bail!("unknown strategy kind: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl BotStatus {
    /// Statuses the supervisor treats as "should have a live loop".
    pub fn wants_loop(&self) -> bool {
        matches!(self, BotStatus::Running | BotStatus::Starting)
    }
}

/// Venue identifier. Each bot binds to exactly one venue and one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    Bybit,
}

impl std::str::FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "bybit" => Ok(Venue::Bybit),
            other => anyhow::bail!("unknown venue: {other}"),
        }
    }
}

/// Already-decrypted credential handed to the core; encryption at rest is an
/// external collaborator's concern.
#[derive(Debug, Clone)]
pub struct ExchangeCredential {
    pub id: String,
    pub venue: Venue,
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub trade_permission: bool,
    pub withdraw_permission: bool,
}

impl ExchangeCredential {
    /// A credential must have trade permission granted at creation.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.trade_permission {
            anyhow::bail!("credential {} lacks trade permission", self.id);
        }
        if self.withdraw_permission {
            tracing::warn!(
                "credential {} has withdraw permission enabled; this is accepted but unsafe",
                self.id
            );
        }
        Ok(())
    }
}

/// Persistent bot configuration and runtime status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub user_id: String,
    pub credential_id: String,
    pub strategy: StrategyKind,
    pub symbol: String,
    pub config_json: serde_json::Value,
    pub status: BotStatus,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub strategy_state_json: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
