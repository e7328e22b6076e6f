use std::str::FromStr;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::domain::errors::TransportError;
use crate::domain::ports::{ExchangeAdapter, ExchangeOrderAck, ExchangeOrderSnapshot, ExchangeOrderStatus};
use crate::domain::trading::types::{Balance, Candle, ExchangeTrade, Fee, MarketMetadata, OrderSide, OrderType, Ticker};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";

/// REST adapter for Bybit's v5 unified-trading API (spot category only).
pub struct BybitAdapter {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
}

fn to_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

fn timeout(e: impl std::fmt::Display) -> TransportError {
    TransportError::Retryable(e.to_string())
}

#[derive(Deserialize)]
struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl BybitAdapter {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, testnet: bool) -> Self {
        let base_url = if testnet {
            "https://api-testnet.bybit.com".to_string()
        } else {
            "https://api.bybit.com".to_string()
        };
        Self {
            client: HttpClientFactory::create_client(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url,
        }
    }

    fn timestamp_ms() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let prehash = format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(prehash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get_signed<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, TransportError> {
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(&timestamp, query);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };
        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-SIGN", &signature)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .send()
            .await
            .map_err(timeout)?;
        handle_envelope(response).await
    }

    async fn post_signed<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let timestamp = Self::timestamp_ms();
        let payload = body.to_string();
        let signature = self.sign(&timestamp, &payload);
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-SIGN", &signature)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(timeout)?;
        handle_envelope(response).await
    }
}

async fn handle_envelope<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(TransportError::Fatal(response.text().await.unwrap_or_default()));
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(TransportError::Retryable(format!("{status}: {text}")));
    }
    let envelope: BybitEnvelope<T> = response.json().await.map_err(timeout)?;
    if envelope.ret_code != 0 {
        return Err(TransportError::Rejected(format!("{}: {}", envelope.ret_code, envelope.ret_msg)));
    }
    envelope
        .result
        .ok_or_else(|| TransportError::Retryable("missing result payload".to_string()))
}

#[derive(Deserialize)]
struct TickerList {
    list: Vec<TickerEntry>,
}

#[derive(Deserialize)]
struct TickerEntry {
    #[serde(rename = "bid1Price")]
    bid1_price: String,
    #[serde(rename = "ask1Price")]
    ask1_price: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Deserialize)]
struct WalletBalanceResult {
    list: Vec<WalletAccount>,
}

#[derive(Deserialize)]
struct WalletAccount {
    coin: Vec<WalletCoin>,
}

#[derive(Deserialize)]
struct WalletCoin {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
    #[serde(rename = "availableToWithdraw", default)]
    available_to_withdraw: String,
}

#[derive(Deserialize)]
struct InstrumentsResult {
    list: Vec<InstrumentEntry>,
}

#[derive(Deserialize)]
struct InstrumentEntry {
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
}

#[derive(Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "minOrderQty")]
    min_order_qty: String,
    #[serde(rename = "qtyStep")]
    qty_step: String,
    #[serde(rename = "minNotionalValue", default)]
    min_notional_value: Option<String>,
}

#[derive(Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Deserialize)]
struct OrderDetailResult {
    list: Vec<OrderDetail>,
}

#[derive(Deserialize)]
struct OrderDetail {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "cumExecQty")]
    cum_exec_qty: String,
    #[serde(rename = "avgPrice")]
    avg_price: String,
    #[serde(rename = "cumExecFee")]
    cum_exec_fee: String,
}

#[derive(Deserialize)]
struct ExecutionListResult {
    list: Vec<ExecutionEntry>,
}

#[derive(Deserialize)]
struct ExecutionEntry {
    #[serde(rename = "execId")]
    exec_id: String,
    #[serde(rename = "orderId")]
    order_id: String,
    side: String,
    #[serde(rename = "execPrice")]
    exec_price: String,
    #[serde(rename = "execQty")]
    exec_qty: String,
    #[serde(rename = "execFee")]
    exec_fee: String,
    #[serde(rename = "feeCurrency", default)]
    fee_currency: Option<String>,
    #[serde(rename = "execTime")]
    exec_time: String,
}

fn parse_status(raw: &str) -> ExchangeOrderStatus {
    match raw {
        "Filled" => ExchangeOrderStatus::Closed,
        "Cancelled" | "Rejected" | "Deactivated" => ExchangeOrderStatus::Canceled,
        _ => ExchangeOrderStatus::Open,
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    async fn connect(&self) -> Result<(), TransportError> {
        self.client
            .get(format!("{}/v5/market/time", self.base_url))
            .send()
            .await
            .map_err(timeout)?;
        Ok(())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, TransportError> {
        let url = format!("{}/v5/market/tickers?category=spot&symbol={}", self.base_url, to_symbol(symbol));
        let response = self.client.get(&url).send().await.map_err(timeout)?;
        let result: TickerList = handle_envelope(response).await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Rejected(format!("no ticker for {symbol}")))?;
        Ok(Ticker {
            bid: Decimal::from_str(&entry.bid1_price).unwrap_or_default(),
            ask: Decimal::from_str(&entry.ask1_price).unwrap_or_default(),
            last: Decimal::from_str(&entry.last_price).unwrap_or_default(),
        })
    }

    async fn fetch_balance(&self) -> Result<Balance, TransportError> {
        let result: WalletBalanceResult = self.get_signed("/v5/account/wallet-balance", "accountType=UNIFIED").await?;
        let mut free = std::collections::HashMap::new();
        let mut total = std::collections::HashMap::new();
        for account in result.list {
            for coin in account.coin {
                let t = Decimal::from_str(&coin.wallet_balance).unwrap_or_default();
                let f = Decimal::from_str(&coin.available_to_withdraw).unwrap_or(t);
                if t > Decimal::ZERO {
                    free.insert(coin.coin.clone(), f);
                    total.insert(coin.coin, t);
                }
            }
        }
        Ok(Balance { free, total })
    }

    async fn market_metadata(&self, symbol: &str) -> Result<MarketMetadata, TransportError> {
        let api_symbol = to_symbol(symbol);
        let url = format!("{}/v5/market/instruments-info?category=spot&symbol={api_symbol}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(timeout)?;
        let result: InstrumentsResult = handle_envelope(response).await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Rejected(format!("unknown symbol {symbol}")))?;
        Ok(MarketMetadata {
            min_notional: entry
                .lot_size_filter
                .min_notional_value
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or(Decimal::ZERO),
            min_qty: Decimal::from_str(&entry.lot_size_filter.min_order_qty).unwrap_or_default(),
            step_size: Decimal::from_str(&entry.lot_size_filter.qty_step).unwrap_or_default(),
        })
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        client_order_id: &str,
    ) -> Result<ExchangeOrderAck, TransportError> {
        let mut body = json!({
            "category": "spot",
            "symbol": to_symbol(symbol),
            "side": if side == OrderSide::Buy { "Buy" } else { "Sell" },
            "orderType": if order_type == OrderType::Market { "Market" } else { "Limit" },
            "qty": quantity.to_string(),
            "orderLinkId": client_order_id,
        });
        if order_type == OrderType::Limit {
            let Some(price) = price else {
                return Err(TransportError::Rejected("limit order submitted without a price".to_string()));
            };
            body["price"] = json!(price.to_string());
            body["timeInForce"] = json!("GTC");
        }

        let result: OrderResult = self.post_signed("/v5/order/create", &body).await?;
        Ok(ExchangeOrderAck {
            exchange_order_id: result.order_id,
            status: ExchangeOrderStatus::Open,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<bool, TransportError> {
        let body = json!({
            "category": "spot",
            "symbol": to_symbol(symbol),
            "orderId": exchange_order_id,
        });
        match self.post_signed::<OrderResult>("/v5/order/cancel", &body).await {
            Ok(_) => Ok(true),
            Err(TransportError::Rejected(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_order(&self, exchange_order_id: &str, symbol: &str) -> Result<ExchangeOrderSnapshot, TransportError> {
        let query = format!("category=spot&symbol={}&orderId={exchange_order_id}", to_symbol(symbol));
        let result: OrderDetailResult = self.get_signed("/v5/order/realtime", &query).await?;
        let detail = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Rejected(format!("order {exchange_order_id} not found")))?;
        Ok(ExchangeOrderSnapshot {
            exchange_order_id: detail.order_id,
            status: parse_status(&detail.order_status),
            filled_quantity: Decimal::from_str(&detail.cum_exec_qty).unwrap_or_default(),
            average_fill_price: Decimal::from_str(&detail.avg_price).ok(),
            fee: Decimal::from_str(&detail.cum_exec_fee).ok(),
            fee_asset: None,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, TransportError> {
        let mut url = format!(
            "{}/v5/market/kline?category=spot&symbol={}&interval={timeframe}",
            self.base_url,
            to_symbol(symbol)
        );
        if let Some(since) = since {
            url.push_str(&format!("&start={since}"));
        }
        url.push_str(&format!("&limit={}", limit.unwrap_or(200)));

        let response = self.client.get(&url).send().await.map_err(timeout)?;

        #[derive(Deserialize)]
        struct KlineResult {
            list: Vec<Vec<String>>,
        }

        let result: KlineResult = handle_envelope(response).await?;
        Ok(result
            .list
            .into_iter()
            .filter_map(|row| {
                let ts = row.first()?.parse::<i64>().ok()?;
                Some(Candle {
                    timestamp: ts,
                    open: Decimal::from_str(row.get(1)?).ok()?,
                    high: Decimal::from_str(row.get(2)?).ok()?,
                    low: Decimal::from_str(row.get(3)?).ok()?,
                    close: Decimal::from_str(row.get(4)?).ok()?,
                    volume: Decimal::from_str(row.get(5)?).ok()?,
                })
            })
            .collect())
    }

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<ExchangeTrade>, TransportError> {
        let mut query = format!("category=spot&symbol={}", to_symbol(symbol));
        if let Some(since) = since {
            query.push_str(&format!("&startTime={since}"));
        }
        query.push_str(&format!("&limit={}", limit.unwrap_or(100)));

        let result: ExecutionListResult = self.get_signed("/v5/execution/list", &query).await?;
        Ok(result
            .list
            .into_iter()
            .map(|e| ExchangeTrade {
                exchange_trade_id: e.exec_id,
                order_exchange_id: Some(e.order_id),
                side: if e.side == "Buy" { OrderSide::Buy } else { OrderSide::Sell },
                price: Decimal::from_str(&e.exec_price).unwrap_or_default(),
                quantity: Decimal::from_str(&e.exec_qty).unwrap_or_default(),
                fee: Some(Fee {
                    cost: Decimal::from_str(&e.exec_fee).unwrap_or_default(),
                    currency: e.fee_currency.unwrap_or_default(),
                }),
                timestamp: e.exec_time.parse().unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_maps_terminal_states() {
        assert_eq!(parse_status("Filled"), ExchangeOrderStatus::Closed);
        assert_eq!(parse_status("Cancelled"), ExchangeOrderStatus::Canceled);
        assert_eq!(parse_status("New"), ExchangeOrderStatus::Open);
    }

    #[test]
    fn sign_is_deterministic_for_same_timestamp() {
        let adapter = BybitAdapter::new("key", "secret", true);
        let a = adapter.sign("1000", "category=spot");
        let b = adapter.sign("1000", "category=spot");
        assert_eq!(a, b);
    }
}
