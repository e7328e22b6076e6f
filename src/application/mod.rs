// Distributed (cross-instance) trading circuit breaker backed by a KvStore
pub mod circuit_breaker;

// Per-bot tick pipeline: strategy decision -> order submission -> fill handling
pub mod engine;

// Prometheus metric registrations
pub mod metrics;

// Outbound notification dispatch (fills, errors)
pub mod notifier;

// Order submission, retry, and fill reconciliation against the exchange
pub mod order_manager;

// FIFO cost-basis trade reconciliation
pub mod reconciler;

// Drawdown tracking and risk actions (pause/flatten)
pub mod risk_manager;

// Grid and DCA strategy engines
pub mod strategies;

// Bot lifecycle supervisor: starts/stops per-bot tasks against desired state
pub mod supervisor;

// Application composition root and graceful shutdown
pub mod system;
