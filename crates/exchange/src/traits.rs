use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use common::models::{Kline, Side};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("order {0} reported no fill")]
    NoFill(String),
}

impl GatewayError {
    /// Timeouts and dropped connections are worth retrying on the next tick;
    /// everything else needs a human or a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Http(e) if e.is_timeout() || e.is_connect())
    }
}

/// Authoritative execution report for a placed order. The engine trusts
/// these figures, never the request it sent.
#[derive(Debug, Clone)]
pub struct Fill {
    pub order_id: String,
    pub avg_price: Decimal,
    /// Quote currency actually executed.
    pub notional: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub instrument: String,
    pub side: Side,
    pub status: String,
}

/// One row of the 24h spot ticker table, used to rank the universe.
#[derive(Debug, Clone)]
pub struct TickerSummary {
    pub instrument: String,
    pub last_price: Decimal,
    pub turnover_24h: Decimal,
}

/// REST surface of the exchange as consumed by the engine. Implementations
/// must bound every call with a client-level timeout so a hung request
/// surfaces as a retryable error instead of stalling a task.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// OHLCV window for one instrument, oldest bar first.
    async fn get_klines(
        &self,
        instrument: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, GatewayError>;

    async fn get_price(&self, instrument: &str) -> Result<Decimal, GatewayError>;

    async fn get_tickers(&self) -> Result<Vec<TickerSummary>, GatewayError>;

    /// Free balance of one asset; an asset absent from the account is zero,
    /// not an error.
    async fn get_balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

    /// Places a market order for `notional` quote units and waits for the
    /// exchange's execution report.
    async fn place_order(
        &self,
        instrument: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<Fill, GatewayError>;

    async fn list_open_orders(&self) -> Result<Vec<OrderRecord>, GatewayError>;
}
