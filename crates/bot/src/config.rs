// Bot configuration from environment variables
//
// Environment variables:
// - TELEGRAM_BOT_TOKEN: Bot API token (required)
// - CHECK_INTERVAL: Sweep period in minutes, 1 to 60 (default: 5)
// - SHELFWATCH_DATA_DIR: Directory for JSON files (default: ./data)
// - SHELFWATCH_CATALOG: Operator catalog file (default: <data dir>/catalog.json)
// - TELEGRAM_API_URL: Bot API base URL (default: https://api.telegram.org)
// - SHELFWATCH_MAX_RETRIES: Attempts per acquisition (default: 3)

use std::path::PathBuf;

use shelfwatch_core::scheduler::MAX_INTERVAL_MINUTES;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub check_interval_minutes: u32,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub max_retries: u32,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let telegram_token = lookup("TELEGRAM_BOT_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let check_interval_minutes = match lookup("CHECK_INTERVAL") {
            None => DEFAULT_CHECK_INTERVAL_MINUTES,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(minutes) if (1..=MAX_INTERVAL_MINUTES).contains(&minutes) => minutes,
                _ => {
                    warn!(value = %raw, default = DEFAULT_CHECK_INTERVAL_MINUTES, "Invalid CHECK_INTERVAL, using default");
                    DEFAULT_CHECK_INTERVAL_MINUTES
                }
            },
        };

        let max_retries = match lookup("SHELFWATCH_MAX_RETRIES") {
            None => DEFAULT_MAX_RETRIES,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SHELFWATCH_MAX_RETRIES",
                        reason: format!("expected a positive integer, got {:?}", raw),
                    })
                }
            },
        };

        let data_dir = lookup("SHELFWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let catalog_path = lookup("SHELFWATCH_CATALOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("catalog.json"));

        let telegram_api_url = lookup("TELEGRAM_API_URL")
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            telegram_token,
            telegram_api_url,
            check_interval_minutes,
            data_dir,
            catalog_path,
            max_retries,
        })
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        self.data_dir.join("subscriptions.json")
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("telegram_token", &"<redacted>")
            .field("telegram_api_url", &self.telegram_api_url)
            .field("check_interval_minutes", &self.check_interval_minutes)
            .field("data_dir", &self.data_dir)
            .field("catalog_path", &self.catalog_path)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
