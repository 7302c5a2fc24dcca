use std::env;
use std::sync::Arc;

use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::config::TradeConfig;
use common::logger;
use common::notify::Notifier;
use exchange::{BybitClient, ExchangeGateway};
use storage::{PositionStore, UniverseStore, db};

use crate::services::coordinator::OrderCoordinator;
use crate::services::scheduler::Scheduler;
use crate::services::telegram_service::TelegramService;
use crate::state::EngineState;

mod services;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logger();
    dotenv().ok();

    let cfg = TradeConfig::from_env();
    info!("engine starting: {:?}", cfg);

    let data_folder = env::var("WORKDIR").unwrap_or_else(|_| "data".to_string());
    let pool = db::open_pool(&data_folder).await?;

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BybitClient::new());
    let store = Arc::new(PositionStore::load(pool.clone()).await?);
    let universe_store = Arc::new(UniverseStore::new(pool));
    let (notifier, notifier_rx) = Notifier::new(256);

    let shutdown = CancellationToken::new();
    let state = Arc::new(EngineState::new(cfg, shutdown.clone()));

    // Seed the universe from the last persisted ranking so the first
    // decision tick has instruments before the first refresh completes.
    let persisted_universe = universe_store.load().await?;
    if !persisted_universe.is_empty() {
        info!("seeding universe with {} persisted instruments", persisted_universe.len());
        state.set_universe(persisted_universe).await;
    }

    let coordinator = Arc::new(OrderCoordinator::new(gateway.clone(), store.clone()));
    let scheduler = Scheduler::new(
        state.clone(),
        gateway.clone(),
        coordinator,
        store.clone(),
        universe_store,
        notifier.clone(),
    );

    let telegram = TelegramService::new(state.clone(), store.clone(), gateway.clone());
    tokio::spawn(telegram.clone().run_notifier(notifier_rx));
    tokio::spawn(telegram.run_commands());

    // An open position without a supervisor is data loss: rebuild every
    // supervisor from the store before the decision loop starts.
    let recovered = store.snapshot().await;
    if !recovered.is_empty() {
        info!("recovering {} persisted positions", recovered.len());
        match gateway.list_open_orders().await {
            Ok(open) => info!("exchange reports {} open orders", open.len()),
            Err(e) => warn!("could not list open orders during recovery: {}", e),
        }
        for position in recovered {
            scheduler.spawn_supervisor(position).await;
        }
        notifier.notify(format!(
            "Recovered {} positions after restart",
            store.len().await
        ));
    }

    let decision_handle = tokio::spawn(scheduler.clone().run_decision_loop());
    let universe_handle = tokio::spawn(scheduler.clone().run_universe_loop());

    notifier.notify("Trading engine online.");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();

    // Wait for the loops, then for every supervisor to reach its safe point.
    let _ = decision_handle.await;
    let _ = universe_handle.await;
    for handle in state.drain_supervisors().await {
        let _ = handle.await;
    }
    info!("engine stopped cleanly");
    Ok(())
}
