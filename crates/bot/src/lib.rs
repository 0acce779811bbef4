// Telegram front-end for shelfwatch
//
// - config: environment configuration
// - telegram: Bot API client (getUpdates, sendMessage), also the MessageSender
// - commands: command parsing and dispatch onto the core Tracker
// - gateway: long-polling update loop

pub mod commands;
pub mod config;
pub mod gateway;
pub mod telegram;

pub use commands::{parse, Command, CommandHandler};
pub use config::{BotConfig, ConfigError};
pub use gateway::{PollerConfig, UpdatePoller};
pub use telegram::{TelegramClient, TelegramError};
