use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Exchange wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live position. At most one exists per instrument, and only the
/// supervisor task that owns it may mutate a live entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Quote-currency notional. Grows through reentries, never shrinks.
    pub size: Decimal,
    /// Best price seen since entry: running max for Buy, running min for Sell.
    pub extreme_price: Decimal,
    pub last_reentry_time: Option<DateTime<Utc>>,
    /// Exchange id of the most recent fill.
    pub order_id: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Re-anchors the extreme to `price` when it is more favorable.
    /// Returns whether the extreme moved.
    pub fn update_extreme(&mut self, price: Decimal) -> bool {
        let moved = match self.side {
            Side::Buy => price > self.extreme_price,
            Side::Sell => price < self.extreme_price,
        };
        if moved {
            self.extreme_price = price;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long() -> Position {
        Position {
            instrument: "BTCUSDT".to_string(),
            side: Side::Buy,
            entry_price: dec!(100),
            size: dec!(50),
            extreme_price: dec!(100),
            last_reentry_time: None,
            order_id: "1".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn extreme_tracks_maximum_for_longs() {
        let mut pos = long();
        assert!(pos.update_extreme(dec!(110)));
        assert_eq!(pos.extreme_price, dec!(110));
        assert!(!pos.update_extreme(dec!(105)));
        assert_eq!(pos.extreme_price, dec!(110));
    }

    #[test]
    fn extreme_tracks_minimum_for_shorts() {
        let mut pos = long();
        pos.side = Side::Sell;
        assert!(!pos.update_extreme(dec!(110)));
        assert!(pos.update_extreme(dec!(90)));
        assert_eq!(pos.extreme_price, dec!(90));
    }
}
