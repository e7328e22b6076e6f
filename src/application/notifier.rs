use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::ports::{NoopNotifier, Notifier};
use crate::domain::trading::types::OrderSide;

/// Writes fills and errors to the structured log. The simplest concrete
/// notifier, always available.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_order_filled(&self, user_id: &str, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) {
        info!(user_id, symbol, %side, %quantity, %price, "order filled");
    }

    async fn notify_error(&self, user_id: &str, message: &str) {
        warn!(user_id, message, "bot error");
    }
}

/// Posts a JSON payload to a configured webhook URL (e.g. a Slack incoming
/// webhook). Delivery failures are logged and swallowed: a notifier must
/// never fail the tick it's reporting on.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, body: serde_json::Value) {
        if let Err(e) = self.client.post(&self.url).json(&body).send().await {
            warn!("webhook notifier delivery failed: {e}");
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_order_filled(&self, user_id: &str, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) {
        self.post(serde_json::json!({
            "event": "order_filled",
            "user_id": user_id,
            "symbol": symbol,
            "side": side.to_string(),
            "quantity": quantity.to_string(),
            "price": price.to_string(),
        }))
        .await;
    }

    async fn notify_error(&self, user_id: &str, message: &str) {
        self.post(serde_json::json!({
            "event": "error",
            "user_id": user_id,
            "message": message,
        }))
        .await;
    }
}

/// Resolves the configured notifier from `NOTIFIER_MODULE`, keying a small
/// fixed set of implementations off that one variable and falling back to a
/// no-op when it is unset or unrecognized.
pub fn build_notifier(notifier_module: Option<&str>) -> Arc<dyn Notifier> {
    match notifier_module {
        Some("log") => Arc::new(LoggingNotifier),
        Some(spec) if spec.starts_with("webhook:") => {
            Arc::new(WebhookNotifier::new(spec.trim_start_matches("webhook:").to_string()))
        }
        Some(other) => {
            warn!("unrecognized NOTIFIER_MODULE '{other}', falling back to a no-op notifier");
            Arc::new(NoopNotifier)
        }
        None => Arc::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_resolves_to_noop() {
        let notifier = build_notifier(None);
        let _: Arc<dyn Notifier> = notifier;
    }

    #[test]
    fn unrecognized_falls_back_to_noop() {
        let _ = build_notifier(Some("carrier-pigeon"));
    }
}
