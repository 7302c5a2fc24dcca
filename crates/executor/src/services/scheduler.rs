use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use common::errors::OrderError;
use common::models::{Direction, Position, Side};
use common::notify::Notifier;
use exchange::{ExchangeGateway, TickerSummary};
use storage::{PositionStore, UniverseStore};
use strategy::{SnapshotBuilder, classify, order_notional};

use crate::services::coordinator::OrderCoordinator;
use crate::services::supervisor::PositionSupervisor;
use crate::state::EngineState;

/// Bases pegged to the quote currency; never part of the tradable universe.
const STABLE_BASES: &[&str] = &["USDC", "BUSD", "DAI", "TUSD", "FDUSD", "EURS"];

/// Drives the two periodic loops: the short-interval open-decision pass over
/// the universe and the coarse universe re-ranking. Neither loop shares any
/// lock with the other beyond the position store itself.
pub struct Scheduler {
    state: Arc<EngineState>,
    gateway: Arc<dyn ExchangeGateway>,
    coordinator: Arc<OrderCoordinator>,
    store: Arc<PositionStore>,
    universe_store: Arc<UniverseStore>,
    notifier: Notifier,
}

impl Scheduler {
    pub fn new(
        state: Arc<EngineState>,
        gateway: Arc<dyn ExchangeGateway>,
        coordinator: Arc<OrderCoordinator>,
        store: Arc<PositionStore>,
        universe_store: Arc<UniverseStore>,
        notifier: Notifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            gateway,
            coordinator,
            store,
            universe_store,
            notifier,
        })
    }

    pub async fn run_decision_loop(self: Arc<Self>) {
        let mut ticker = time::interval(self.state.cfg.decision_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.state.shutdown_token();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("decision loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if !self.state.is_active() {
                        debug!("auto-trade inactive, skipping decision tick");
                        continue;
                    }
                    self.decision_tick().await;
                }
            }
        }
    }

    async fn decision_tick(&self) {
        let universe = self.state.universe().await;
        if universe.is_empty() {
            warn!("universe empty, waiting for refresh");
            return;
        }

        for instrument in universe {
            if self.state.shutdown_token().is_cancelled() {
                return;
            }
            // A live position means its supervisor owns this instrument.
            if self.store.contains(&instrument).await {
                continue;
            }
            if let Err(e) = self.evaluate_instrument(&instrument).await {
                match e {
                    OrderError::DataUnavailable(reason) => {
                        debug!("{instrument}: data unavailable: {reason}");
                    }
                    OrderError::InsufficientFunds => {
                        debug!("{instrument}: balance below minimum notional");
                    }
                    e => {
                        error!("{instrument}: {e}");
                        self.notifier
                            .notify(format!("Order failed for {instrument}: {e}"));
                    }
                }
            }
        }
    }

    /// The open pipeline for one instrument: snapshot, classify, size,
    /// submit, then hand the fill to a fresh supervisor.
    async fn evaluate_instrument(&self, instrument: &str) -> Result<(), OrderError> {
        let cfg = &self.state.cfg;
        let klines = self
            .gateway
            .get_klines(instrument, &cfg.kline_interval, cfg.kline_limit)
            .await
            .map_err(|e| OrderError::DataUnavailable(e.to_string()))?;

        // Indicator warm-up is a normal condition, not an error.
        let Some(snapshot) = SnapshotBuilder::compute(&klines) else {
            debug!("{instrument}: window warming up ({} bars)", klines.len());
            return Ok(());
        };

        let signal = classify(&snapshot, cfg.volatility_ceiling);
        if !signal.is_actionable() {
            return Ok(());
        }

        let balance = self
            .gateway
            .get_balance(&cfg.quote_asset)
            .await
            .map_err(|e| OrderError::DataUnavailable(e.to_string()))?;
        let notional = order_notional(balance, signal.strength, cfg.min_order_notional);
        if notional.is_zero() {
            return Err(OrderError::InsufficientFunds);
        }

        let side = match signal.direction {
            Direction::Buy => Side::Buy,
            Direction::Sell => Side::Sell,
            Direction::Hold => return Ok(()),
        };

        let position = self.coordinator.open(instrument, side, notional).await?;
        self.notifier.notify(format!(
            "Opened {} {} at {} (strength {}, size {})",
            side, instrument, position.entry_price, signal.strength, position.size
        ));
        self.spawn_supervisor(position).await;
        Ok(())
    }

    /// Starts the monitoring task that owns this position from here on.
    pub async fn spawn_supervisor(&self, position: Position) {
        let supervisor = PositionSupervisor::new(
            position,
            self.gateway.clone(),
            self.coordinator.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.state.cfg.clone(),
            self.state.shutdown_token(),
        );
        let handle = tokio::spawn(supervisor.run());
        self.state.track_supervisor(handle).await;
    }

    pub async fn run_universe_loop(self: Arc<Self>) {
        let mut ticker = time::interval(self.state.cfg.universe_refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.state.shutdown_token();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("universe loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.refresh_universe().await;
                }
                _ = self.state.refresh_requested() => {
                    info!("universe refresh forced by operator");
                    self.refresh_universe().await;
                }
            }
        }
    }

    async fn refresh_universe(&self) {
        let tickers = match self.gateway.get_tickers().await {
            Ok(tickers) => tickers,
            Err(e) => {
                warn!("universe refresh failed: {}", e);
                return;
            }
        };

        let cfg = &self.state.cfg;
        let ranked = rank_universe(
            tickers,
            &cfg.quote_asset,
            cfg.min_turnover,
            cfg.universe_size,
        );
        if ranked.is_empty() {
            warn!("universe refresh produced no instruments, keeping previous");
            return;
        }

        if let Err(e) = self.universe_store.replace(&ranked).await {
            error!("failed to persist universe: {}", e);
        }
        info!("universe refreshed: {:?}", ranked);
        self.state.set_universe(ranked).await;
    }
}

/// Ranks spot tickers by 24h turnover for one quote currency, dropping
/// quote-pegged stable bases and thin markets.
pub fn rank_universe(
    tickers: Vec<TickerSummary>,
    quote: &str,
    min_turnover: Decimal,
    top_n: usize,
) -> Vec<String> {
    let mut eligible: Vec<TickerSummary> = tickers
        .into_iter()
        .filter(|t| t.instrument.ends_with(quote) && t.instrument.len() > quote.len())
        .filter(|t| {
            let base = &t.instrument[..t.instrument.len() - quote.len()];
            !STABLE_BASES.contains(&base)
        })
        .filter(|t| t.turnover_24h >= min_turnover)
        .collect();
    eligible.sort_by(|a, b| b.turnover_24h.cmp(&a.turnover_24h));
    eligible.truncate(top_n);
    eligible.into_iter().map(|t| t.instrument).collect()
}
