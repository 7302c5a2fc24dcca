use serde::Deserialize;

use common::models::Kline;

use crate::remote::{parse_f64, parse_i64};
use crate::traits::GatewayError;

/// `GET /v5/market/kline` payload. Each row is
/// `[startTime, open, high, low, close, volume, turnover]`, newest first.
#[derive(Debug, Deserialize)]
pub struct KlineResult {
    pub symbol: String,
    pub list: Vec<[String; 7]>,
}

impl KlineResult {
    /// Converts to typed bars in chronological order (the exchange sends
    /// newest-first; every indicator fold wants oldest-first).
    pub fn into_klines(self) -> Result<Vec<Kline>, GatewayError> {
        let mut out = Vec::with_capacity(self.list.len());
        for row in self.list.into_iter().rev() {
            out.push(Kline {
                start_time: parse_i64(&row[0])?,
                open: parse_f64(&row[1])?,
                high: parse_f64(&row[2])?,
                low: parse_f64(&row[3])?,
                close: parse_f64(&row[4])?,
                volume: parse_f64(&row[5])?,
                turnover: parse_f64(&row[6])?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_reversed_to_chronological_order() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "list": [
                ["1700003600000", "101", "103", "100", "102", "5", "510"],
                ["1700000000000", "100", "102", "99", "101", "4", "404"]
            ]
        }"#;
        let result: KlineResult = serde_json::from_str(json).unwrap();
        let klines = result.into_klines().unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].start_time, 1_700_000_000_000);
        assert_eq!(klines[1].start_time, 1_700_003_600_000);
        assert_eq!(klines[1].close, 102.0);
        assert_eq!(klines[0].turnover, 404.0);
    }

    #[test]
    fn bad_numeric_field_is_a_parse_error() {
        let result = KlineResult {
            symbol: "BTCUSDT".to_string(),
            list: vec![[
                "1700000000000".to_string(),
                "not-a-number".to_string(),
                "1".to_string(),
                "1".to_string(),
                "1".to_string(),
                "1".to_string(),
                "1".to_string(),
            ]],
        };
        assert!(matches!(
            result.into_klines(),
            Err(GatewayError::Parse(_))
        ));
    }
}
