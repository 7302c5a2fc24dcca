/// Indicator values derived from the most recent closed bar of one
/// instrument. Recomputed on every evaluation tick, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub atr: f64,
}
