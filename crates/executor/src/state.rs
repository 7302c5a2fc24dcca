use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::config::TradeConfig;

/// Shared engine state: the operator-controlled active flag, the process
/// shutdown token, the current instrument universe, and the set of running
/// supervisor tasks.
///
/// `active` and `shutdown` are deliberately separate signals: stopping the
/// engine only pauses the decision loop, while shutdown additionally asks
/// every supervisor to park at its next safe point.
pub struct EngineState {
    pub cfg: TradeConfig,
    active: watch::Sender<bool>,
    shutdown: CancellationToken,
    universe: RwLock<Vec<String>>,
    refresh: Notify,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineState {
    pub fn new(cfg: TradeConfig, shutdown: CancellationToken) -> Self {
        let (active, _) = watch::channel(cfg.autostart);
        Self {
            cfg,
            active,
            shutdown,
            universe: RwLock::new(Vec::new()),
            refresh: Notify::new(),
            supervisors: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Flips the decision-loop flag; returns the previous value so command
    /// handlers can tell a toggle from a no-op.
    pub fn set_active(&self, on: bool) -> bool {
        self.active.send_replace(on)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn universe(&self) -> Vec<String> {
        self.universe.read().await.clone()
    }

    pub async fn set_universe(&self, instruments: Vec<String>) {
        *self.universe.write().await = instruments;
    }

    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub async fn refresh_requested(&self) {
        self.refresh.notified().await;
    }

    pub async fn track_supervisor(&self, handle: JoinHandle<()>) {
        self.supervisors.lock().await.push(handle);
    }

    /// Hands the accumulated supervisor handles to the caller for a final
    /// join during shutdown.
    pub async fn drain_supervisors(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.supervisors.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_active_reports_previous_value() {
        let state = EngineState::new(TradeConfig::default(), CancellationToken::new());
        assert!(!state.is_active());
        assert!(!state.set_active(true));
        assert!(state.is_active());
        assert!(state.set_active(true));
        assert!(state.set_active(false));
        assert!(!state.is_active());
    }
}
