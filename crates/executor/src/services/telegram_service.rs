use std::env;
use std::sync::Arc;

use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use exchange::ExchangeGateway;
use storage::PositionStore;

use crate::state::EngineState;

/// Operator surface: the command bot plus the notification fan-out. Both run
/// against the same admin chat; commands from anywhere else are ignored.
#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
    chat_id: ChatId,
    state: Arc<EngineState>,
    store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Engine controls:")]
enum Command {
    #[command(description = "activate the decision loop")]
    Start,
    #[command(description = "deactivate the decision loop; open positions stay supervised")]
    Stop,
    #[command(description = "engine state and open positions")]
    Status,
    #[command(description = "re-rank the instrument universe now")]
    Refresh,
    #[command(description = "quote balance")]
    Balance,
}

impl TelegramService {
    pub fn new(
        state: Arc<EngineState>,
        store: Arc<PositionStore>,
        gateway: Arc<dyn ExchangeGateway>,
    ) -> Self {
        // Critical config: the engine is unattended, so running without its
        // operator channel is worse than failing at startup.
        let token = env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN not set in .env");
        let chat_id_str = env::var("TELEGRAM_CHAT_ID").expect("TELEGRAM_CHAT_ID not set in .env");
        let chat_id = chat_id_str
            .parse::<i64>()
            .expect("TELEGRAM_CHAT_ID must be a number");

        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
            state,
            store,
            gateway,
        }
    }

    /// Forwards engine notifications to the admin chat. Send failures are
    /// logged and never propagated.
    pub async fn run_notifier(self, mut rx: broadcast::Receiver<String>) {
        info!("Starting Telegram notification service");

        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = self.bot.send_message(self.chat_id, msg).await {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Telegram service lagged behind, missed {} messages", n);
                }
                Err(_) => {
                    info!("Notification channel closed. Stopping service.");
                    break;
                }
            }
        }
    }

    pub async fn run_commands(self) {
        info!("Starting Telegram command handler");
        let bot = self.bot.clone();
        let service = Arc::new(self);

        let handler = Update::filter_message()
            .filter_command::<Command>()
            .endpoint(Self::handle_command);

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![service])
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(
        bot: Bot,
        msg: Message,
        cmd: Command,
        service: Arc<TelegramService>,
    ) -> ResponseResult<()> {
        if msg.chat.id != service.chat_id {
            warn!("ignoring command from unauthorized chat {}", msg.chat.id);
            return Ok(());
        }

        let reply = match cmd {
            Command::Start => service.cmd_start(),
            Command::Stop => service.cmd_stop(),
            Command::Status => service.cmd_status().await,
            Command::Refresh => {
                service.state.request_refresh();
                "Universe refresh requested.".to_string()
            }
            Command::Balance => service.cmd_balance().await,
        };
        bot.send_message(msg.chat.id, reply).await?;
        Ok(())
    }

    fn cmd_start(&self) -> String {
        if self.state.set_active(true) {
            "Auto-trade already running.".to_string()
        } else {
            info!("auto-trade activated by operator");
            "Auto-trade started.".to_string()
        }
    }

    fn cmd_stop(&self) -> String {
        if self.state.set_active(false) {
            info!("auto-trade deactivated by operator");
            "Auto-trade stopped. Open positions stay supervised.".to_string()
        } else {
            "Auto-trade already stopped.".to_string()
        }
    }

    async fn cmd_status(&self) -> String {
        let positions = self.store.snapshot().await;
        let universe = self.state.universe().await;

        let mut out = format!(
            "Auto-trade: {}\nUniverse: {} instruments\nOpen positions: {}\n",
            if self.state.is_active() { "on" } else { "off" },
            universe.len(),
            positions.len()
        );
        for p in positions {
            out.push_str(&format!(
                "{} {} entry {} size {} extreme {}\n",
                p.side, p.instrument, p.entry_price, p.size, p.extreme_price
            ));
        }
        out
    }

    async fn cmd_balance(&self) -> String {
        match self.gateway.get_balance(&self.state.cfg.quote_asset).await {
            Ok(balance) => format!("{} balance: {}", self.state.cfg.quote_asset, balance),
            Err(e) => format!("Balance unavailable: {}", e),
        }
    }
}
