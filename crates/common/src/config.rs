use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Engine tuning knobs, read once at startup. Every field has a default so a
/// bare environment still runs; secrets (API keys, bot token) are read by the
/// components that own them.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    /// Quote currency of every tradable instrument and of the balance used
    /// for sizing.
    pub quote_asset: String,
    /// Bar interval requested from the exchange, in exchange notation
    /// (minutes for intraday).
    pub kline_interval: String,
    pub kline_limit: u32,
    /// Cadence of the open-decision loop.
    pub decision_interval: Duration,
    /// Cadence of the instrument-universe re-ranking.
    pub universe_refresh_interval: Duration,
    pub universe_size: usize,
    /// Minimum 24h turnover for an instrument to be considered tradable.
    pub min_turnover: Decimal,
    /// Cadence of each position supervisor's price poll.
    pub poll_interval: Duration,
    /// Trailing-stop offset from the extreme price, in percent.
    pub trailing_stop_pct: Decimal,
    /// Take-profit offset from the entry price, in percent.
    pub take_profit_pct: Decimal,
    /// Favorable move from entry that arms a reentry, in percent.
    pub reentry_trigger_pct: Decimal,
    pub reentry_cooldown: Duration,
    /// Signal strength a reentry is sized at.
    pub reentry_strength: u32,
    /// Exchange minimum order notional in quote currency.
    pub min_order_notional: Decimal,
    /// ATR above this level vetoes both condition sets.
    pub volatility_ceiling: f64,
    /// Whether the decision loop is active at boot, before any operator
    /// command arrives.
    pub autostart: bool,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            kline_interval: "60".to_string(),
            kline_limit: 400,
            decision_interval: Duration::from_secs(60),
            universe_refresh_interval: Duration::from_secs(4 * 3600),
            universe_size: 10,
            min_turnover: Decimal::from(100_000),
            poll_interval: Duration::from_secs(5),
            trailing_stop_pct: Decimal::from(2),
            take_profit_pct: Decimal::from(4),
            reentry_trigger_pct: Decimal::new(15, 1),
            reentry_cooldown: Duration::from_secs(900),
            reentry_strength: 5,
            min_order_notional: Decimal::from(5),
            volatility_ceiling: 10.0,
            autostart: false,
        }
    }
}

impl TradeConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        override_var("TRADE_QUOTE_ASSET", &mut cfg.quote_asset);
        override_var("TRADE_KLINE_INTERVAL", &mut cfg.kline_interval);
        override_var("TRADE_KLINE_LIMIT", &mut cfg.kline_limit);
        override_secs("TRADE_DECISION_INTERVAL_SECS", &mut cfg.decision_interval);
        override_secs(
            "TRADE_UNIVERSE_REFRESH_SECS",
            &mut cfg.universe_refresh_interval,
        );
        override_var("TRADE_UNIVERSE_SIZE", &mut cfg.universe_size);
        override_var("TRADE_MIN_TURNOVER", &mut cfg.min_turnover);
        override_secs("TRADE_POLL_INTERVAL_SECS", &mut cfg.poll_interval);
        override_var("TRADE_TRAILING_STOP_PCT", &mut cfg.trailing_stop_pct);
        override_var("TRADE_TAKE_PROFIT_PCT", &mut cfg.take_profit_pct);
        override_var("TRADE_REENTRY_TRIGGER_PCT", &mut cfg.reentry_trigger_pct);
        override_secs("TRADE_REENTRY_COOLDOWN_SECS", &mut cfg.reentry_cooldown);
        override_var("TRADE_REENTRY_STRENGTH", &mut cfg.reentry_strength);
        override_var("TRADE_MIN_ORDER_NOTIONAL", &mut cfg.min_order_notional);
        override_var("TRADE_VOLATILITY_CEILING", &mut cfg.volatility_ceiling);
        override_var("TRADE_AUTOSTART", &mut cfg.autostart);
        cfg
    }
}

fn override_var<T: FromStr>(key: &str, slot: &mut T) {
    if let Some(value) = env::var(key).ok().and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

fn override_secs(key: &str, slot: &mut Duration) {
    if let Some(secs) = env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        *slot = Duration::from_secs(secs);
    }
}
