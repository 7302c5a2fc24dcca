use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use common::models::{Kline, Side};

use crate::remote::kline_response::KlineResult;
use crate::remote::order_response::{OrderCreateResult, OrderListResult};
use crate::remote::parse_decimal;
use crate::remote::ticker_response::TickerResult;
use crate::remote::wallet_response::WalletResult;
use crate::traits::{ExchangeGateway, Fill, GatewayError, OrderRecord, TickerSummary};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Market orders usually report execution immediately; a short poll covers
/// the occasional lag before `avgPrice` appears.
const FILL_POLL_ATTEMPTS: u32 = 5;
const FILL_POLL_DELAY: Duration = Duration::from_millis(300);

/// Bybit v5 response envelope; `retCode != 0` is an API-level failure even
/// on HTTP 200.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl BybitClient {
    pub fn new() -> Self {
        let api_key = env::var("BYBIT_API_KEY").expect("BYBIT_API_KEY not set");
        let secret_key = env::var("BYBIT_API_SECRET").expect("BYBIT_API_SECRET not set");
        let base_url =
            env::var("BYBIT_BASE_URL").unwrap_or_else(|_| "https://api.bybit.com".to_string());
        Self::with_credentials(base_url, api_key, secret_key)
    }

    pub fn with_credentials(base_url: String, api_key: String, secret_key: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static options");
        Self {
            client,
            base_url,
            api_key,
            secret_key,
        }
    }

    /// v5 signature: HMAC-SHA256 over `timestamp + api_key + recv_window +
    /// payload`, where payload is the query string for GETs and the raw JSON
    /// body for POSTs.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self.client.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, GatewayError> {
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        // The signed payload and the wire body must be byte-identical.
        let payload = body.to_string();
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }
        let envelope: ApiEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Parse(format!("{e}: {text}")))?;
        if envelope.ret_code != 0 {
            return Err(GatewayError::Api {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }
        envelope
            .result
            .ok_or_else(|| GatewayError::Parse("missing result payload".to_string()))
    }

    /// Reads the authoritative execution report for a just-placed order.
    async fn await_fill(&self, instrument: &str, order_id: &str) -> Result<Fill, GatewayError> {
        let query = format!("category=spot&symbol={instrument}&orderId={order_id}");
        for attempt in 0..FILL_POLL_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(FILL_POLL_DELAY).await;
            }
            let result: OrderListResult = self.get_signed("/v5/order/realtime", &query).await?;
            let Some(entry) = result.list.iter().find(|e| e.order_id == order_id) else {
                continue;
            };
            if entry.is_dead() {
                return Err(GatewayError::Api {
                    code: -1,
                    message: format!("order {order_id} ended {}", entry.order_status),
                });
            }
            if entry.is_filled() {
                return Ok(Fill {
                    order_id: order_id.to_string(),
                    avg_price: parse_decimal(&entry.avg_price)?,
                    notional: parse_decimal(&entry.cum_exec_value)?,
                });
            }
        }
        Err(GatewayError::NoFill(order_id.to_string()))
    }
}

#[async_trait]
impl ExchangeGateway for BybitClient {
    async fn get_klines(
        &self,
        instrument: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, GatewayError> {
        let query =
            format!("category=spot&symbol={instrument}&interval={interval}&limit={limit}");
        let result: KlineResult = self.get_public("/v5/market/kline", &query).await?;
        result.into_klines()
    }

    async fn get_price(&self, instrument: &str) -> Result<Decimal, GatewayError> {
        let query = format!("category=spot&symbol={instrument}");
        let result: TickerResult = self.get_public("/v5/market/tickers", &query).await?;
        let entry = result
            .list
            .first()
            .ok_or_else(|| GatewayError::Parse(format!("no ticker for {instrument}")))?;
        parse_decimal(&entry.last_price)
    }

    async fn get_tickers(&self) -> Result<Vec<TickerSummary>, GatewayError> {
        let result: TickerResult = self
            .get_public("/v5/market/tickers", "category=spot")
            .await?;
        Ok(result.into_summaries())
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        let result: WalletResult = self
            .get_signed("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        match result.balance_of(asset) {
            Some(raw) => parse_decimal(raw),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn place_order(
        &self,
        instrument: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<Fill, GatewayError> {
        let order_link_id = Uuid::new_v4().simple().to_string();
        let body = json!({
            "category": "spot",
            "symbol": instrument,
            "side": side.as_str(),
            "orderType": "Market",
            "qty": notional.to_string(),
            "marketUnit": "quoteCoin",
            "orderLinkId": order_link_id,
        });

        info!("placing market {side} {instrument} for {notional} quote units");
        let created: OrderCreateResult = self.post_signed("/v5/order/create", &body).await?;
        self.await_fill(instrument, &created.order_id).await
    }

    async fn list_open_orders(&self) -> Result<Vec<OrderRecord>, GatewayError> {
        let result: OrderListResult = self
            .get_signed("/v5/order/realtime", "category=spot&openOnly=0&limit=50")
            .await?;
        let records = result
            .list
            .into_iter()
            .filter_map(|entry| {
                let side = match entry.side.as_str() {
                    "Buy" => Side::Buy,
                    "Sell" => Side::Sell,
                    other => {
                        warn!("skipping order {} with side {other}", entry.order_id);
                        return None;
                    }
                };
                Some(OrderRecord {
                    order_id: entry.order_id,
                    instrument: entry.symbol,
                    side,
                    status: entry.order_status,
                })
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BybitClient {
        BybitClient::with_credentials(
            "https://api-testnet.bybit.com".to_string(),
            "key".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn signature_is_deterministic_per_payload() {
        let c = client();
        let a = c.sign(1_700_000_000_000, "category=spot&symbol=BTCUSDT");
        let b = c.sign(1_700_000_000_000, "category=spot&symbol=BTCUSDT");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_covers_timestamp_and_payload() {
        let c = client();
        let base = c.sign(1_700_000_000_000, "accountType=UNIFIED");
        assert_ne!(base, c.sign(1_700_000_000_001, "accountType=UNIFIED"));
        assert_ne!(base, c.sign(1_700_000_000_000, "accountType=SPOT"));
    }

    #[test]
    fn envelope_failure_code_maps_to_api_error() {
        let json = r#"{"retCode": 10004, "retMsg": "bad sign", "result": null}"#;
        let envelope: ApiEnvelope<TickerResult> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.ret_code, 10004);
        assert!(envelope.result.is_none());
    }
}
