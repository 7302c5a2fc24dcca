use serde::Deserialize;
use tracing::warn;

use crate::remote::parse_decimal;
use crate::traits::TickerSummary;

/// `GET /v5/market/tickers` payload (spot category).
#[derive(Debug, Deserialize)]
pub struct TickerResult {
    pub list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TickerEntry {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "turnover24h")]
    pub turnover_24h: String,
}

impl TickerResult {
    /// Typed summaries; rows with unusable numbers are dropped with a
    /// warning rather than failing the whole refresh.
    pub fn into_summaries(self) -> Vec<TickerSummary> {
        self.list
            .into_iter()
            .filter_map(|entry| {
                let last_price = parse_decimal(&entry.last_price).ok()?;
                let turnover_24h = match parse_decimal(&entry.turnover_24h) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("skipping ticker {}: {}", entry.symbol, e);
                        return None;
                    }
                };
                Some(TickerSummary {
                    instrument: entry.symbol,
                    last_price,
                    turnover_24h,
                })
            })
            .collect()
    }
}
