use std::str::FromStr;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::domain::errors::TransportError;
use crate::domain::ports::{ExchangeOrderStatus, UserDataEvent, UserDataStream};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

/// Private order-update feed. Holds a listenKey alive via periodic PUT
/// requests and reconnects the socket itself with backoff; `run` never
/// returns under normal operation.
pub struct BinanceUserDataStream {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
    ws_base: String,
}

impl BinanceUserDataStream {
    pub fn new(api_key: impl Into<String>, testnet: bool) -> Self {
        let (base_url, ws_base) = if testnet {
            ("https://testnet.binance.vision".to_string(), "wss://testnet.binance.vision".to_string())
        } else {
            ("https://api.binance.com".to_string(), "wss://stream.binance.com:9443".to_string())
        };
        Self {
            client: HttpClientFactory::create_client(),
            api_key: api_key.into(),
            base_url,
            ws_base,
        }
    }

    async fn create_listen_key(&self) -> Result<String, TransportError> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "listenKey")]
            listen_key: String,
        }
        let response = self
            .client
            .post(format!("{}/api/v3/userDataStream", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Fatal(format!("listenKey creation failed: {}", response.status())));
        }
        let parsed: Resp = response.json().await.map_err(|e| TransportError::Retryable(e.to_string()))?;
        Ok(parsed.listen_key)
    }

    async fn keepalive(&self, listen_key: &str) {
        let result = self
            .client
            .put(format!("{}/api/v3/userDataStream?listenKey={listen_key}", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await;
        if let Err(e) = result {
            warn!("listenKey keepalive failed: {e}");
        }
    }

    async fn connect_and_stream(&self, sink: &Sender<UserDataEvent>) -> Result<(), TransportError> {
        let listen_key = self.create_listen_key().await?;
        let url = format!("{}/ws/{}", self.ws_base, listen_key);
        info!("connecting to Binance user data stream");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        let mut keepalive_interval = tokio::time::interval(tokio::time::Duration::from_secs(30 * 60));

        loop {
            tokio::select! {
                _ = keepalive_interval.tick() => {
                    self.keepalive(&listen_key).await;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                            if let Some(event) = parse_execution_report(&text) {
                                if sink.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) | None => {
                            info!("Binance user data stream closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(TransportError::Retryable(e.to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct ExecutionReport {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "X")]
    order_status: String,
    #[serde(rename = "z")]
    cumulative_filled_qty: String,
    #[serde(rename = "L", default)]
    last_fill_price: Option<String>,
    #[serde(rename = "n", default)]
    commission: Option<String>,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
}

fn parse_execution_report(text: &str) -> Option<UserDataEvent> {
    let report: ExecutionReport = serde_json::from_str(text).ok()?;
    if report.event_type != "executionReport" {
        return None;
    }
    let status = match report.order_status.as_str() {
        "FILLED" => ExchangeOrderStatus::Closed,
        "CANCELED" | "EXPIRED" | "REJECTED" => ExchangeOrderStatus::Canceled,
        _ => ExchangeOrderStatus::Open,
    };
    Some(UserDataEvent::OrderUpdate {
        exchange_order_id: report.order_id.to_string(),
        status,
        filled_quantity: Decimal::from_str(&report.cumulative_filled_qty).unwrap_or_default(),
        average_fill_price: report.last_fill_price.and_then(|p| Decimal::from_str(&p).ok()),
        fee: report.commission.and_then(|c| Decimal::from_str(&c).ok()),
        fee_asset: report.commission_asset,
    })
}

#[async_trait]
impl UserDataStream for BinanceUserDataStream {
    async fn run(&self, sink: Sender<UserDataEvent>) -> Result<(), TransportError> {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 60;

        loop {
            match self.connect_and_stream(&sink).await {
                Ok(()) => {
                    debug!("user data stream closed gracefully, reconnecting in 5s");
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    backoff = 1;
                }
                Err(e) => {
                    error!("user data stream error: {e}, reconnecting in {backoff}s");
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
    fn parse_execution_report_maps_fill_fields() {
        let text = r#"{"e":"executionReport","i":123,"X":"FILLED","z":"0.50000000","L":"27000.10","n":"0.0001","N":"BNB"}"#;
        let event = parse_execution_report(text).expect("parses");
        match event {
            UserDataEvent::OrderUpdate { exchange_order_id, status, filled_quantity, .. } => {
                assert_eq!(exchange_order_id, "123");
                assert_eq!(status, ExchangeOrderStatus::Closed);
                assert_eq!(filled_quantity, Decimal::from_str("0.50000000").unwrap());
            }
            _ => panic!("expected OrderUpdate"),
        }
    }

    #[test]
    fn parse_execution_report_ignores_other_event_types() {
        let text = r#"{"e":"outboundAccountPosition","i":0,"X":"NEW","z":"0"}"#;
        assert!(parse_execution_report(text).is_none());
    }
}
