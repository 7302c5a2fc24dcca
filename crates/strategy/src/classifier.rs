use common::models::{Direction, IndicatorSnapshot, Signal};

/// Corroborating conditions required before a side becomes actionable.
const MIN_CONDITIONS: u32 = 3;

/// A close within 2% of the band still counts as touching it.
const LOWER_BAND_SLACK: f64 = 1.02;
const UPPER_BAND_SLACK: f64 = 0.98;

/// Maps one indicator snapshot to a trade signal by counting satisfied
/// conditions on each side. When both sides qualify the buy side wins;
/// callers must not assume symmetry.
pub fn classify(snapshot: &IndicatorSnapshot, volatility_ceiling: f64) -> Signal {
    let buy = count(&[
        snapshot.rsi < 30.0,
        snapshot.macd > snapshot.macd_signal,
        snapshot.close <= snapshot.bb_lower * LOWER_BAND_SLACK,
        snapshot.atr < volatility_ceiling,
        snapshot.close > snapshot.sma_50,
    ]);

    let sell = count(&[
        snapshot.rsi > 70.0,
        snapshot.macd < snapshot.macd_signal,
        snapshot.close >= snapshot.bb_upper * UPPER_BAND_SLACK,
        snapshot.atr < volatility_ceiling,
        snapshot.close < snapshot.sma_50,
    ]);

    if buy >= MIN_CONDITIONS {
        Signal {
            direction: Direction::Buy,
            strength: buy,
        }
    } else if sell >= MIN_CONDITIONS {
        Signal {
            direction: Direction::Sell,
            strength: sell,
        }
    } else {
        Signal::HOLD
    }
}

fn count(conditions: &[bool]) -> u32 {
    conditions.iter().filter(|c| **c).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            sma_50: 100.0,
            sma_200: 100.0,
            bb_upper: 110.0,
            bb_lower: 90.0,
            atr: 20.0,
        }
    }

    #[test]
    fn all_five_buy_conditions_give_full_strength() {
        let snapshot = IndicatorSnapshot {
            close: 0.99 * 90.0, // at the lower band
            rsi: 25.0,
            macd: 1.0,
            macd_signal: 0.5,
            sma_50: 80.0, // close above
            sma_200: 85.0,
            bb_upper: 110.0,
            bb_lower: 90.0,
            atr: 5.0,
        };
        let signal = classify(&snapshot, 10.0);
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.strength, 5);
    }

    #[test]
    fn mirrored_sell_conditions_give_full_strength() {
        let snapshot = IndicatorSnapshot {
            close: 111.0,
            rsi: 75.0,
            macd: -1.0,
            macd_signal: 0.0,
            sma_50: 120.0,
            sma_200: 100.0,
            bb_upper: 110.0,
            bb_lower: 90.0,
            atr: 5.0,
        };
        let signal = classify(&snapshot, 10.0);
        assert_eq!(signal.direction, Direction::Sell);
        assert_eq!(signal.strength, 5);
    }

    #[test]
    fn fewer_than_three_conditions_hold() {
        let mut snapshot = neutral();
        snapshot.rsi = 25.0;
        snapshot.macd = 1.0; // two buy conditions only
        let signal = classify(&snapshot, 10.0);
        assert_eq!(signal, Signal::HOLD);
    }

    #[test]
    fn neutral_snapshot_holds_with_zero_strength() {
        assert_eq!(classify(&neutral(), 10.0), Signal::HOLD);
    }

    #[test]
    fn tie_resolves_buy_first() {
        // Buy: rsi, macd, atr. Sell: upper band touch, below SMA50, atr.
        let snapshot = IndicatorSnapshot {
            close: 100.0,
            rsi: 25.0,
            macd: 2.0,
            macd_signal: 1.0,
            sma_50: 150.0,
            sma_200: 100.0,
            bb_upper: 100.0,
            bb_lower: 50.0,
            atr: 5.0,
        };
        let signal = classify(&snapshot, 10.0);
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.strength, 3);
    }

    #[test]
    fn strength_never_exceeds_condition_count() {
        // Exhaustive over a coarse grid of extremes on both sides.
        for rsi in [10.0, 50.0, 90.0] {
            for close in [80.0, 100.0, 120.0] {
                for macd in [-1.0, 1.0] {
                    let mut snapshot = neutral();
                    snapshot.rsi = rsi;
                    snapshot.close = close;
                    snapshot.macd = macd;
                    let signal = classify(&snapshot, 10.0);
                    assert!(signal.strength <= 5);
                    assert_eq!(
                        signal.direction == Direction::Hold,
                        signal.strength == 0,
                        "hold iff zero strength"
                    );
                }
            }
        }
    }
}
