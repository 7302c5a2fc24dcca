use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::models::{Kline, Position, Side};
use exchange::{ExchangeGateway, Fill, GatewayError, OrderRecord, TickerSummary};
use storage::PositionStore;

mock! {
    pub Gateway {}

    #[async_trait]
    impl ExchangeGateway for Gateway {
        async fn get_klines(
            &self,
            instrument: &str,
            interval: &str,
            limit: u32,
        ) -> Result<Vec<Kline>, GatewayError>;

        async fn get_price(&self, instrument: &str) -> Result<Decimal, GatewayError>;

        async fn get_tickers(&self) -> Result<Vec<TickerSummary>, GatewayError>;

        async fn get_balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

        async fn place_order(
            &self,
            instrument: &str,
            side: Side,
            notional: Decimal,
        ) -> Result<Fill, GatewayError>;

        async fn list_open_orders(&self) -> Result<Vec<OrderRecord>, GatewayError>;
    }
}

pub(crate) async fn mem_store() -> Arc<PositionStore> {
    let pool = storage::db::open_in_memory().await.unwrap();
    Arc::new(PositionStore::load(pool).await.unwrap())
}

pub(crate) fn sample_position(instrument: &str) -> Position {
    Position {
        instrument: instrument.to_string(),
        side: Side::Buy,
        entry_price: dec!(100),
        size: dec!(50),
        extreme_price: dec!(100),
        last_reentry_time: None,
        order_id: "ord-0".to_string(),
        opened_at: Utc::now(),
    }
}
