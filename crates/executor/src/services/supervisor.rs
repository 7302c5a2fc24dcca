use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::config::TradeConfig;
use common::errors::OrderError;
use common::models::{Position, Side};
use common::notify::Notifier;
use exchange::ExchangeGateway;
use storage::PositionStore;
use strategy::order_notional;

use crate::services::coordinator::OrderCoordinator;

const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(1);
const PERSIST_ALERT_AFTER: u32 = 3;

/// Lifecycle of one supervised position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Polling price, maintaining the trailing envelope.
    Monitoring,
    /// A reentry order is in flight.
    Reentering,
    /// Exit decided. The close order and the store removal may take several
    /// ticks to both land; the decision itself is never revisited.
    Closing,
    /// Store entry removed; the task is done.
    Closed,
}

/// Trailing stop re-anchored to the best price seen since entry.
pub fn trailing_stop(side: Side, extreme: Decimal, pct: Decimal) -> Decimal {
    let offset = extreme * pct / Decimal::ONE_HUNDRED;
    match side {
        Side::Buy => extreme - offset,
        Side::Sell => extreme + offset,
    }
}

/// Take-profit measured from the entry price, not the extreme.
pub fn take_profit(side: Side, entry: Decimal, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::ONE_HUNDRED;
    match side {
        Side::Buy => entry + offset,
        Side::Sell => entry - offset,
    }
}

/// Whether `price` has crossed either edge of the exit envelope.
pub fn crossed_exit(side: Side, price: Decimal, stop: Decimal, target: Decimal) -> bool {
    match side {
        Side::Buy => price <= stop || price >= target,
        Side::Sell => price >= stop || price <= target,
    }
}

/// Price level beyond which a favorable move arms a reentry.
pub fn reentry_trigger(side: Side, entry: Decimal, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::ONE_HUNDRED;
    match side {
        Side::Buy => entry + offset,
        Side::Sell => entry - offset,
    }
}

/// One task per live position. Owns the trailing-stop/take-profit envelope
/// and the reentry decisions for that position; nothing else may mutate it
/// while the task runs.
pub struct PositionSupervisor {
    position: Position,
    state: SupervisorState,
    /// Set once the exchange acknowledges the close, so a lingering store
    /// row is retried without ever re-sending the order.
    exchange_closed: bool,
    gateway: Arc<dyn ExchangeGateway>,
    coordinator: Arc<OrderCoordinator>,
    store: Arc<PositionStore>,
    notifier: Notifier,
    cfg: TradeConfig,
    shutdown: CancellationToken,
    removal_failures: u32,
}

impl PositionSupervisor {
    pub fn new(
        position: Position,
        gateway: Arc<dyn ExchangeGateway>,
        coordinator: Arc<OrderCoordinator>,
        store: Arc<PositionStore>,
        notifier: Notifier,
        cfg: TradeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            position,
            state: SupervisorState::Monitoring,
            exchange_closed: false,
            gateway,
            coordinator,
            store,
            notifier,
            cfg,
            shutdown,
            removal_failures: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Polls until the position closes or shutdown is requested. Shutdown is
    /// only honored between ticks: every tick leaves the store row matching
    /// the in-memory position, which is exactly the restart recovery point.
    pub async fn run(mut self) {
        info!(
            "supervising {} {} from entry {}",
            self.position.side, self.position.instrument, self.position.entry_price
        );
        let mut ticker = time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state != SupervisorState::Closed {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("supervisor for {} parking for shutdown", self.position.instrument);
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("supervisor for {} finished", self.position.instrument);
    }

    /// One cycle of the state machine; `run` is this plus pacing and
    /// shutdown.
    pub async fn tick(&mut self) {
        match self.state {
            SupervisorState::Monitoring | SupervisorState::Reentering => self.monitor().await,
            SupervisorState::Closing => self.finish_close().await,
            SupervisorState::Closed => {}
        }
    }

    async fn monitor(&mut self) {
        let price = match self.gateway.get_price(&self.position.instrument).await {
            Ok(price) => price,
            Err(e) => {
                // Price gaps are routine; supervision just waits a tick.
                debug!("price unavailable for {}: {}", self.position.instrument, e);
                return;
            }
        };

        if self.position.update_extreme(price) {
            self.persist_position().await;
        }

        let stop = trailing_stop(
            self.position.side,
            self.position.extreme_price,
            self.cfg.trailing_stop_pct,
        );
        let target = take_profit(
            self.position.side,
            self.position.entry_price,
            self.cfg.take_profit_pct,
        );

        if crossed_exit(self.position.side, price, stop, target) {
            info!(
                "{} crossed exit envelope: price {}, stop {}, target {}",
                self.position.instrument, price, stop, target
            );
            self.state = SupervisorState::Closing;
            self.finish_close().await;
            return;
        }

        if self.reentry_eligible(price) {
            self.reenter(price).await;
        }
    }

    fn reentry_eligible(&self, price: Decimal) -> bool {
        let trigger = reentry_trigger(
            self.position.side,
            self.position.entry_price,
            self.cfg.reentry_trigger_pct,
        );
        let beyond = match self.position.side {
            Side::Buy => price >= trigger,
            Side::Sell => price <= trigger,
        };
        if !beyond {
            return false;
        }

        let anchor = self
            .position
            .last_reentry_time
            .unwrap_or(self.position.opened_at);
        let cooldown = chrono::Duration::from_std(self.cfg.reentry_cooldown)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        Utc::now().signed_duration_since(anchor) >= cooldown
    }

    async fn reenter(&mut self, price: Decimal) {
        self.state = SupervisorState::Reentering;

        let balance = match self.gateway.get_balance(&self.cfg.quote_asset).await {
            Ok(balance) => balance,
            Err(e) => {
                debug!(
                    "balance unavailable, skipping reentry on {}: {}",
                    self.position.instrument, e
                );
                self.state = SupervisorState::Monitoring;
                return;
            }
        };

        let extra = order_notional(
            balance,
            self.cfg.reentry_strength,
            self.cfg.min_order_notional,
        );
        if extra.is_zero() {
            debug!("balance too small to reenter {}", self.position.instrument);
            self.state = SupervisorState::Monitoring;
            return;
        }

        match self.coordinator.add_to_position(&self.position, extra).await {
            Ok(updated) => {
                self.notifier.notify(format!(
                    "Reentered {} {}: +{} at {}, size now {}",
                    self.position.side, self.position.instrument, extra, price, updated.size
                ));
                self.position = updated;
            }
            Err(e) => {
                // A failed reentry must never endanger the position itself.
                warn!("reentry failed for {}: {}", self.position.instrument, e);
                self.notifier
                    .notify(format!("Reentry failed for {}: {}", self.position.instrument, e));
            }
        }
        self.state = SupervisorState::Monitoring;
    }

    async fn finish_close(&mut self) {
        if !self.exchange_closed {
            match self.coordinator.close(&self.position).await {
                Ok(()) => {
                    self.exchange_closed = true;
                    self.state = SupervisorState::Closed;
                    self.notifier.notify(format!(
                        "Closed {} {} (size {})",
                        self.position.side, self.position.instrument, self.position.size
                    ));
                    return;
                }
                Err(OrderError::Persistence(e)) => {
                    // Order acknowledged; only the store row survived it.
                    error!(
                        "close settled but removal pending for {}: {}",
                        self.position.instrument, e
                    );
                    self.exchange_closed = true;
                }
                Err(e) => {
                    // The close decision stands; the order is retried every
                    // tick until the exchange takes it.
                    warn!(
                        "close failed for {}, retrying next tick: {}",
                        self.position.instrument, e
                    );
                    return;
                }
            }
        }

        match self.coordinator.remove_entry(&self.position.instrument).await {
            Ok(()) => {
                self.state = SupervisorState::Closed;
                self.notifier.notify(format!(
                    "Closed {} {} (size {})",
                    self.position.side, self.position.instrument, self.position.size
                ));
            }
            Err(e) => {
                self.removal_failures += 1;
                error!(
                    "store removal still failing for {} ({} rounds): {}",
                    self.position.instrument, self.removal_failures, e
                );
                if self.removal_failures == PERSIST_ALERT_AFTER {
                    self.notifier.notify(format!(
                        "Persistence diverged for {}: position closed on exchange but still recorded",
                        self.position.instrument
                    ));
                }
            }
        }
    }

    /// The durable row must match the in-memory position before the state
    /// machine advances.
    async fn persist_position(&mut self) {
        let mut attempts = 0u32;
        loop {
            match self.store.upsert(self.position.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    attempts += 1;
                    error!(
                        "persist failed for {} (attempt {}): {}",
                        self.position.instrument, attempts, e
                    );
                    if attempts == PERSIST_ALERT_AFTER {
                        self.notifier.notify(format!(
                            "Persistence failing for {}: {}",
                            self.position.instrument, e
                        ));
                    }
                    if self.shutdown.is_cancelled() && attempts >= PERSIST_ALERT_AFTER {
                        return;
                    }
                    time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{mem_store, sample_position, MockGateway};
    use exchange::{Fill, GatewayError};
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn test_cfg() -> TradeConfig {
        TradeConfig {
            trailing_stop_pct: dec!(2),
            take_profit_pct: dec!(50),
            reentry_trigger_pct: dec!(1),
            reentry_cooldown: Duration::from_secs(3600),
            reentry_strength: 5,
            min_order_notional: dec!(5),
            ..TradeConfig::default()
        }
    }

    async fn supervisor_with(
        gateway: MockGateway,
        position: Position,
        cfg: TradeConfig,
    ) -> (PositionSupervisor, Arc<PositionStore>) {
        let store = mem_store().await;
        store.upsert(position.clone()).await.unwrap();
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(gateway);
        let coordinator = Arc::new(OrderCoordinator::new(gateway.clone(), store.clone()));
        let (notifier, _rx) = Notifier::new(16);
        let supervisor = PositionSupervisor::new(
            position,
            gateway,
            coordinator,
            store.clone(),
            notifier,
            cfg,
            CancellationToken::new(),
        );
        (supervisor, store)
    }

    #[test]
    fn envelope_math_mirrors_by_side() {
        assert_eq!(trailing_stop(Side::Buy, dec!(110), dec!(2)), dec!(107.8));
        assert_eq!(trailing_stop(Side::Sell, dec!(90), dec!(2)), dec!(91.8));
        assert_eq!(take_profit(Side::Buy, dec!(100), dec!(4)), dec!(104));
        assert_eq!(take_profit(Side::Sell, dec!(100), dec!(4)), dec!(96));
        assert_eq!(reentry_trigger(Side::Buy, dec!(100), dec!(1.5)), dec!(101.5));
        assert_eq!(reentry_trigger(Side::Sell, dec!(100), dec!(1.5)), dec!(98.5));
    }

    #[test]
    fn exit_crossing_mirrors_by_side() {
        // Long: stop below, target above.
        assert!(crossed_exit(Side::Buy, dec!(107), dec!(107.8), dec!(150)));
        assert!(crossed_exit(Side::Buy, dec!(150), dec!(107.8), dec!(150)));
        assert!(!crossed_exit(Side::Buy, dec!(110), dec!(107.8), dec!(150)));
        // Short: stop above, target below.
        assert!(crossed_exit(Side::Sell, dec!(92), dec!(91.8), dec!(60)));
        assert!(crossed_exit(Side::Sell, dec!(59), dec!(91.8), dec!(60)));
        assert!(!crossed_exit(Side::Sell, dec!(80), dec!(91.8), dec!(60)));
    }

    #[tokio::test]
    async fn trailing_stop_closes_after_the_extreme_rises() {
        let mut gateway = MockGateway::new();
        let mut seq = Sequence::new();
        // Extreme moves to 110, stop re-anchors to 107.8.
        gateway
            .expect_get_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(dec!(110)));
        // 107 is through the stop: the close order goes out.
        gateway
            .expect_get_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(dec!(107)));
        gateway
            .expect_place_order()
            .withf(|_, side, notional| *side == Side::Sell && *notional == dec!(50))
            .times(1)
            .returning(|_, _, _| {
                Ok(Fill {
                    order_id: "close-1".to_string(),
                    avg_price: dec!(107),
                    notional: dec!(50),
                })
            });

        let (mut supervisor, store) =
            supervisor_with(gateway, sample_position("BTCUSDT"), test_cfg()).await;

        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert_eq!(supervisor.position().extreme_price, dec!(110));
        assert_eq!(store.get("BTCUSDT").await.unwrap().extreme_price, dec!(110));

        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Closed);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn take_profit_closes_from_entry_not_extreme() {
        let mut cfg = test_cfg();
        cfg.take_profit_pct = dec!(4);
        cfg.trailing_stop_pct = dec!(50);
        cfg.reentry_trigger_pct = dec!(99);

        let mut gateway = MockGateway::new();
        gateway
            .expect_get_price()
            .times(1)
            .returning(|_| Ok(dec!(104.5)));
        gateway.expect_place_order().times(1).returning(|_, _, _| {
            Ok(Fill {
                order_id: "close-2".to_string(),
                avg_price: dec!(104.5),
                notional: dec!(50),
            })
        });

        let (mut supervisor, store) =
            supervisor_with(gateway, sample_position("BTCUSDT"), cfg).await;
        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Closed);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_close_is_retried_on_the_next_tick() {
        let mut gateway = MockGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(dec!(104.5)));
        gateway
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Err(GatewayError::Api {
                    code: 10001,
                    message: "exchange busy".to_string(),
                })
            });
        // Next tick goes straight back to the close, no price fetch needed.
        gateway
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(Fill {
                    order_id: "close-3".to_string(),
                    avg_price: dec!(104.4),
                    notional: dec!(50),
                })
            });

        let mut cfg = test_cfg();
        cfg.take_profit_pct = dec!(4);
        cfg.reentry_trigger_pct = dec!(99);

        let (mut supervisor, store) =
            supervisor_with(gateway, sample_position("BTCUSDT"), cfg).await;

        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Closing);
        assert!(store.contains("BTCUSDT").await, "never dropped while open");

        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Closed);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn reentry_fires_once_then_respects_the_cooldown() {
        let mut position = sample_position("BTCUSDT");
        position.opened_at = Utc::now() - chrono::Duration::hours(2);

        let mut gateway = MockGateway::new();
        gateway
            .expect_get_price()
            .times(2)
            .returning(|_| Ok(dec!(101.5)));
        gateway
            .expect_get_balance()
            .times(1)
            .returning(|_| Ok(dec!(1000)));
        gateway
            .expect_place_order()
            .withf(|_, side, notional| *side == Side::Buy && *notional == dec!(50))
            .times(1)
            .returning(|_, _, _| {
                Ok(Fill {
                    order_id: "re-1".to_string(),
                    avg_price: dec!(101.5),
                    notional: dec!(50),
                })
            });

        let (mut supervisor, store) = supervisor_with(gateway, position, test_cfg()).await;

        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert_eq!(supervisor.position().size, dec!(100));
        assert!(supervisor.position().last_reentry_time.is_some());
        assert_eq!(store.get("BTCUSDT").await.unwrap().size, dec!(100));

        // Same favorable price immediately after: cooldown blocks a second
        // add, so no further balance or order calls are expected.
        supervisor.tick().await;
        assert_eq!(supervisor.position().size, dec!(100));
    }

    #[tokio::test]
    async fn no_reentry_before_the_cooldown_has_elapsed() {
        // opened_at is now, so the anchor is fresh and nothing may fire.
        let mut gateway = MockGateway::new();
        gateway
            .expect_get_price()
            .times(1)
            .returning(|_| Ok(dec!(101.5)));

        let (mut supervisor, _store) =
            supervisor_with(gateway, sample_position("BTCUSDT"), test_cfg()).await;
        supervisor.tick().await;
        assert_eq!(supervisor.position().size, dec!(50));
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
    }

    #[tokio::test]
    async fn reentry_failure_keeps_the_position_monitored() {
        let mut position = sample_position("BTCUSDT");
        position.opened_at = Utc::now() - chrono::Duration::hours(2);

        let mut gateway = MockGateway::new();
        gateway
            .expect_get_price()
            .times(1)
            .returning(|_| Ok(dec!(101.5)));
        gateway
            .expect_get_balance()
            .times(1)
            .returning(|_| Ok(dec!(1000)));
        gateway.expect_place_order().times(1).returning(|_, _, _| {
            Err(GatewayError::Api {
                code: 170131,
                message: "insufficient balance".to_string(),
            })
        });

        let (mut supervisor, store) = supervisor_with(gateway, position, test_cfg()).await;
        supervisor.tick().await;

        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert_eq!(supervisor.position().size, dec!(50));
        assert_eq!(store.get("BTCUSDT").await.unwrap().size, dec!(50));
    }

    #[tokio::test]
    async fn unavailable_price_leaves_everything_untouched() {
        let mut gateway = MockGateway::new();
        gateway.expect_get_price().times(1).returning(|_| {
            Err(GatewayError::Parse("no ticker".to_string()))
        });

        let (mut supervisor, store) =
            supervisor_with(gateway, sample_position("BTCUSDT"), test_cfg()).await;
        supervisor.tick().await;

        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert!(store.contains("BTCUSDT").await);
    }
}
