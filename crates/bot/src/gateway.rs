// Update poller
//
// Long-polls getUpdates, hands every command to the CommandHandler in its own
// task and backs off exponentially while the Bot API is unreachable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use shelfwatch_core::SubscriberId;

use crate::commands::{self, CommandHandler};
use crate::telegram::{TelegramClient, Update};

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Server-side long-poll timeout in seconds
    pub long_poll_secs: u64,
    /// First wait after a failed poll
    pub min_backoff: Duration,
    /// Ceiling for the wait between failed polls
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            long_poll_secs: 30,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

pub struct UpdatePoller {
    client: Arc<TelegramClient>,
    handler: Arc<CommandHandler>,
    config: PollerConfig,
    offset: Option<i64>,
}

impl UpdatePoller {
    pub fn new(client: Arc<TelegramClient>, handler: Arc<CommandHandler>, config: PollerConfig) -> Self {
        Self {
            client,
            handler,
            config,
            offset: None,
        }
    }

    /// Poll until `shutdown_rx` flips to true
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Update poller started");
        let mut backoff = self.config.min_backoff;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let polled = tokio::select! {
                result = self.client.get_updates(self.offset, self.config.long_poll_secs) => result,
                _ = shutdown_rx.changed() => break,
            };

            match polled {
                Ok(updates) => {
                    backoff = self.config.min_backoff;
                    for update in updates {
                        self.dispatch(update);
                    }
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Polling error");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }

        info!("Update poller stopped");
    }

    /// Advance the offset and spawn the command, if the update carries one
    fn dispatch(&mut self, update: Update) {
        self.offset = Some(update.update_id + 1);

        let Some(message) = update.message else {
            return;
        };
        let Some(command) = message.text.as_deref().and_then(commands::parse) else {
            return;
        };

        let chat = SubscriberId(message.chat.id);
        debug!(chat = %chat, update_id = update.update_id, "Command received");

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            if let Err(e) = handler.handle(chat, command).await {
                warn!(chat = %chat, error = %e, "Failed to reply");
            }
        });
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }
}
