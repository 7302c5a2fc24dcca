use ta::indicators::{
    AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::{DataItem, Next};

use common::models::{IndicatorSnapshot, Kline};

/// Bars required before every indicator in the snapshot carries real output;
/// SMA(200) is the binding constraint.
pub const MIN_BARS: usize = 200;

pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Folds a chronological OHLCV window into indicator values for the most
    /// recent bar. Returns `None` while the window is still warming up (or a
    /// bar is malformed); callers treat that as Hold, not as an error.
    pub fn compute(klines: &[Kline]) -> Option<IndicatorSnapshot> {
        if klines.len() < MIN_BARS {
            return None;
        }

        // Standard parameterizations throughout.
        let mut rsi = RelativeStrengthIndex::new(14).unwrap();
        let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).unwrap();
        let mut sma_50 = SimpleMovingAverage::new(50).unwrap();
        let mut sma_200 = SimpleMovingAverage::new(200).unwrap();
        let mut bb = BollingerBands::new(20, 2.0).unwrap();
        let mut atr = AverageTrueRange::new(14).unwrap();

        let mut snapshot = None;
        for kline in klines {
            let close = kline.close;
            let rsi_value = rsi.next(close);
            let macd_value = macd.next(close);
            let sma_50_value = sma_50.next(close);
            let sma_200_value = sma_200.next(close);
            let bb_value = bb.next(close);

            let bar = DataItem::builder()
                .open(kline.open)
                .high(kline.high)
                .low(kline.low)
                .close(kline.close)
                .volume(kline.volume)
                .build()
                .ok()?;
            let atr_value = atr.next(&bar);

            snapshot = Some(IndicatorSnapshot {
                close,
                rsi: rsi_value,
                macd: macd_value.macd,
                macd_signal: macd_value.signal,
                sma_50: sma_50_value,
                sma_200: sma_200_value,
                bb_upper: bb_value.upper,
                bb_lower: bb_value.lower,
                atr: atr_value,
            });
        }
        snapshot
    }
}
