use std::str::FromStr;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info};

use crate::domain::errors::TransportError;
use crate::domain::ports::{ExchangeOrderStatus, UserDataEvent, UserDataStream};

type HmacSha256 = Hmac<Sha256>;

/// Private order-update feed over Bybit's v5 WebSocket, authenticated with
/// an expiring signed payload rather than a listenKey.
pub struct BybitUserDataStream {
    api_key: String,
    api_secret: String,
    ws_url: String,
}

impl BybitUserDataStream {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, testnet: bool) -> Self {
        let ws_url = if testnet {
            "wss://stream-testnet.bybit.com/v5/private".to_string()
        } else {
            "wss://stream.bybit.com/v5/private".to_string()
        };
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ws_url,
        }
    }

    fn auth_payload(&self) -> serde_json::Value {
        let expires = chrono::Utc::now().timestamp_millis() + 10_000;
        let prehash = format!("GET/realtime{expires}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(prehash.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        json!({
            "op": "auth",
            "args": [self.api_key, expires, signature],
        })
    }

    async fn connect_and_stream(&self, sink: &Sender<UserDataEvent>) -> Result<(), TransportError> {
        info!("connecting to Bybit private stream");
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(self.auth_payload().to_string().into()))
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;
        let subscribe = json!({"op": "subscribe", "args": ["order"]});
        write
            .send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(20));

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    let ping = json!({"op": "ping"}).to_string();
                    if write.send(Message::Text(ping.into())).await.is_err() {
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for event in parse_order_topic(&text) {
                                if sink.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Bybit private stream closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(TransportError::Retryable(e.to_string())),
                        _ => {}
                    }
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct TopicMessage {
    topic: Option<String>,
    data: Option<Vec<OrderUpdate>>,
}

#[derive(Deserialize)]
struct OrderUpdate {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "cumExecQty")]
    cum_exec_qty: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: Option<String>,
    #[serde(rename = "cumExecFee", default)]
    cum_exec_fee: Option<String>,
}

fn parse_order_topic(text: &str) -> Vec<UserDataEvent> {
    let Ok(msg) = serde_json::from_str::<TopicMessage>(text) else {
        return vec![];
    };
    if msg.topic.as_deref() != Some("order") {
        return vec![];
    }
    msg.data
        .unwrap_or_default()
        .into_iter()
        .map(|u| {
            let status = match u.order_status.as_str() {
                "Filled" => ExchangeOrderStatus::Closed,
                "Cancelled" | "Rejected" | "Deactivated" => ExchangeOrderStatus::Canceled,
                _ => ExchangeOrderStatus::Open,
            };
            UserDataEvent::OrderUpdate {
                exchange_order_id: u.order_id,
                status,
                filled_quantity: Decimal::from_str(&u.cum_exec_qty).unwrap_or_default(),
                average_fill_price: u.avg_price.and_then(|p| Decimal::from_str(&p).ok()),
                fee: u.cum_exec_fee.and_then(|f| Decimal::from_str(&f).ok()),
                fee_asset: None,
            }
        })
        .collect()
}

#[async_trait]
impl UserDataStream for BybitUserDataStream {
    async fn run(&self, sink: Sender<UserDataEvent>) -> Result<(), TransportError> {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 60;

        loop {
            match self.connect_and_stream(&sink).await {
                Ok(()) => {
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    backoff = 1;
                }
                Err(e) => {
                    error!("Bybit private stream error: {e}, reconnecting in {backoff}s");
                    tokio::time::sleep(tokio::time::Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_order_topic_ignores_non_order_topics() {
        let text = r#"{"topic":"wallet","data":[]}"#;
        assert!(parse_order_topic(text).is_empty());
    }

    #[test]
    fn parse_order_topic_maps_fill() {
        let text = r#"{"topic":"order","data":[{"orderId":"1","orderStatus":"Filled","cumExecQty":"1.5","avgPrice":"100","cumExecFee":"0.1"}]}"#;
        let events = parse_order_topic(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            UserDataEvent::OrderUpdate { status, filled_quantity, .. } => {
                assert_eq!(*status, ExchangeOrderStatus::Closed);
                assert_eq!(*filled_quantity, Decimal::from_str("1.5").unwrap());
            }
            _ => panic!("expected OrderUpdate"),
        }
    }
}
