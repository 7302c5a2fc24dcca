use rust_decimal::Decimal;

use crate::traits::GatewayError;

pub mod bybit_client;
pub mod kline_response;
pub mod order_response;
pub mod ticker_response;
pub mod wallet_response;

pub use bybit_client::BybitClient;

/// Bybit sends every number as a string; empty means "not applicable yet".
pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, GatewayError> {
    if raw.is_empty() {
        return Err(GatewayError::Parse("empty numeric field".to_string()));
    }
    raw.parse()
        .map_err(|_| GatewayError::Parse(format!("bad decimal: {raw}")))
}

pub(crate) fn parse_f64(raw: &str) -> Result<f64, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::Parse(format!("bad float: {raw}")))
}

pub(crate) fn parse_i64(raw: &str) -> Result<i64, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::Parse(format!("bad integer: {raw}")))
}
