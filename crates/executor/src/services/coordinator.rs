use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info};

use common::errors::OrderError;
use common::models::{Position, Side};
use exchange::{ExchangeGateway, GatewayError};
use storage::PositionStore;

/// Store writes are retried a few times before the failure escalates:
/// sqlite hiccups are transient, anything longer needs the operator.
const PERSIST_ATTEMPTS: u32 = 5;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Single point of order submission. All order activity for one instrument
/// is serialized behind a per-instrument mutex, and an open for an
/// instrument that already holds a live position is rejected before
/// anything reaches the exchange.
pub struct OrderCoordinator {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<PositionStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderCoordinator {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, store: Arc<PositionStore>) -> Self {
        Self {
            gateway,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn instrument_lock(&self, instrument: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(instrument.to_string()).or_default().clone()
    }

    /// Opens a fresh position. The returned entry reflects the exchange's
    /// fill report, not the requested notional.
    pub async fn open(
        &self,
        instrument: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<Position, OrderError> {
        let lock = self.instrument_lock(instrument).await;
        let _guard = lock.lock().await;

        if self.store.contains(instrument).await {
            return Err(OrderError::PositionOpen(instrument.to_string()));
        }

        let fill = self
            .gateway
            .place_order(instrument, side, notional)
            .await
            .map_err(map_gateway)?;

        let position = Position {
            instrument: instrument.to_string(),
            side,
            entry_price: fill.avg_price,
            size: fill.notional,
            extreme_price: fill.avg_price,
            last_reentry_time: None,
            order_id: fill.order_id,
            opened_at: Utc::now(),
        };

        self.persist(&position).await?;
        info!(
            "opened {} {} at {} for {}",
            side, instrument, position.entry_price, position.size
        );
        Ok(position)
    }

    /// Adds `extra_notional` to a live position and returns the updated
    /// entry with the grown size and a fresh reentry timestamp.
    pub async fn add_to_position(
        &self,
        position: &Position,
        extra_notional: Decimal,
    ) -> Result<Position, OrderError> {
        let lock = self.instrument_lock(&position.instrument).await;
        let _guard = lock.lock().await;

        let fill = self
            .gateway
            .place_order(&position.instrument, position.side, extra_notional)
            .await
            .map_err(map_gateway)?;

        let mut updated = position.clone();
        updated.size += fill.notional;
        updated.last_reentry_time = Some(Utc::now());
        updated.order_id = fill.order_id;

        self.persist(&updated).await?;
        info!(
            "added {} to {} position, size now {}",
            fill.notional, updated.instrument, updated.size
        );
        Ok(updated)
    }

    /// Closes a live position with an opposite-side market order and removes
    /// its store entry on acknowledgment.
    ///
    /// A `Persistence` error here means the exchange accepted the close but
    /// the row is still present; callers must retry only the removal, never
    /// the order.
    pub async fn close(&self, position: &Position) -> Result<(), OrderError> {
        let lock = self.instrument_lock(&position.instrument).await;
        let _guard = lock.lock().await;

        let fill = self
            .gateway
            .place_order(
                &position.instrument,
                position.side.opposite(),
                position.size,
            )
            .await
            .map_err(map_gateway)?;

        info!(
            "closed {} {} at {} (order {})",
            position.side, position.instrument, fill.avg_price, fill.order_id
        );
        self.remove_entry(&position.instrument).await
    }

    /// Removes a store row whose exchange side is already settled.
    pub async fn remove_entry(&self, instrument: &str) -> Result<(), OrderError> {
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.remove(instrument).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(
                        "store removal failed for {} (attempt {}): {}",
                        instrument, attempt, e
                    );
                    if attempt == PERSIST_ATTEMPTS {
                        return Err(OrderError::Persistence(e.to_string()));
                    }
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
        unreachable!("retry loop always returns");
    }

    async fn persist(&self, position: &Position) -> Result<(), OrderError> {
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.upsert(position.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(
                        "store write failed for {} (attempt {}): {}",
                        position.instrument, attempt, e
                    );
                    if attempt == PERSIST_ATTEMPTS {
                        return Err(OrderError::Persistence(e.to_string()));
                    }
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
        unreachable!("retry loop always returns");
    }
}

fn map_gateway(e: GatewayError) -> OrderError {
    match e {
        GatewayError::Api { code, message } => OrderError::Rejected(format!("{code}: {message}")),
        e if e.is_retryable() => OrderError::DataUnavailable(e.to_string()),
        e => OrderError::Unexpected(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{mem_store, sample_position, MockGateway};
    use exchange::Fill;
    use rust_decimal_macros::dec;

    fn fill(order_id: &str, price: Decimal, notional: Decimal) -> Fill {
        Fill {
            order_id: order_id.to_string(),
            avg_price: price,
            notional,
        }
    }

    #[tokio::test]
    async fn open_uses_the_exchange_fill_not_the_request() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_place_order()
            .withf(|i, side, notional| {
                i == "BTCUSDT" && *side == Side::Buy && *notional == dec!(50)
            })
            .times(1)
            .returning(|_, _, _| Ok(fill("ord-1", dec!(101.5), dec!(49.9))));

        let store = mem_store().await;
        let coordinator = OrderCoordinator::new(Arc::new(gateway), store.clone());

        let position = coordinator
            .open("BTCUSDT", Side::Buy, dec!(50))
            .await
            .unwrap();

        assert_eq!(position.entry_price, dec!(101.5));
        assert_eq!(position.size, dec!(49.9));
        assert_eq!(position.extreme_price, dec!(101.5));
        assert!(store.contains("BTCUSDT").await);
    }

    #[tokio::test]
    async fn open_is_rejected_when_a_position_already_exists() {
        // No place_order expectation: reaching the exchange would panic.
        let gateway = MockGateway::new();
        let store = mem_store().await;
        store.upsert(sample_position("BTCUSDT")).await.unwrap();

        let coordinator = OrderCoordinator::new(Arc::new(gateway), store);
        let err = coordinator
            .open("BTCUSDT", Side::Buy, dec!(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::PositionOpen(_)));
    }

    #[tokio::test]
    async fn concurrent_opens_admit_exactly_one_position() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|_, _, _| Ok(fill("ord-1", dec!(100), dec!(50))));

        let store = mem_store().await;
        let coordinator = Arc::new(OrderCoordinator::new(Arc::new(gateway), store.clone()));

        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.open("BTCUSDT", Side::Buy, dec!(50)).await })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.open("BTCUSDT", Side::Buy, dec!(50)).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1, "exactly one open wins");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn exchange_failure_leaves_the_store_untouched() {
        let mut gateway = MockGateway::new();
        gateway.expect_place_order().times(1).returning(|_, _, _| {
            Err(exchange::GatewayError::Api {
                code: 170131,
                message: "insufficient balance".to_string(),
            })
        });

        let store = mem_store().await;
        let coordinator = OrderCoordinator::new(Arc::new(gateway), store.clone());

        let err = coordinator
            .open("BTCUSDT", Side::Buy, dec!(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Rejected(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn add_to_position_grows_size_and_stamps_reentry() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_place_order()
            .withf(|_, side, notional| *side == Side::Buy && *notional == dec!(25))
            .times(1)
            .returning(|_, _, _| Ok(fill("ord-2", dec!(105), dec!(25))));

        let store = mem_store().await;
        let position = sample_position("BTCUSDT");
        store.upsert(position.clone()).await.unwrap();

        let coordinator = OrderCoordinator::new(Arc::new(gateway), store.clone());
        let updated = coordinator
            .add_to_position(&position, dec!(25))
            .await
            .unwrap();

        assert_eq!(updated.size, position.size + dec!(25));
        assert!(updated.last_reentry_time.is_some());
        assert_eq!(updated.order_id, "ord-2");
        assert_eq!(store.get("BTCUSDT").await.unwrap().size, updated.size);
    }

    #[tokio::test]
    async fn close_sells_the_full_size_and_removes_the_entry() {
        let position = sample_position("BTCUSDT");
        let size = position.size;

        let mut gateway = MockGateway::new();
        gateway
            .expect_place_order()
            .withf(move |i, side, notional| {
                i == "BTCUSDT" && *side == Side::Sell && *notional == size
            })
            .times(1)
            .returning(|_, _, _| Ok(fill("ord-3", dec!(108), dec!(50))));

        let store = mem_store().await;
        store.upsert(position.clone()).await.unwrap();

        let coordinator = OrderCoordinator::new(Arc::new(gateway), store.clone());
        coordinator.close(&position).await.unwrap();
        assert!(store.is_empty().await);
    }
}
