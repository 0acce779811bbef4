use std::sync::Arc;

use anyhow::{Context, Result};
use shelfwatch_bot::{BotConfig, CommandHandler, PollerConfig, TelegramClient, UpdatePoller};
use shelfwatch_core::telemetry::{init_telemetry, TelemetryConfig};
use shelfwatch_core::{
    Acquirer, Catalog, CountLedger, HttpLauncher, HttpSourceConfig, JsonSubscriptionStore,
    Notifier, RetryPolicy, Scheduler, SchedulerConfig, Tracker,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via RUST_LOG or LOG_LEVEL (default: "info")
    init_telemetry(TelemetryConfig::from_env());

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        interval_minutes = config.check_interval_minutes,
        data_dir = %config.data_dir.display(),
        "shelfwatch starting"
    );

    let telegram = Arc::new(
        TelegramClient::new(&config.telegram_api_url, &config.telegram_token)
            .context("Failed to create Telegram client")?,
    );

    let acquirer = Acquirer::new(Arc::new(HttpLauncher::new(HttpSourceConfig::default())))
        .with_policy(RetryPolicy::default().with_max_attempts(config.max_retries));

    let tracker = Arc::new(Tracker::new(
        Arc::new(Catalog::load(&config.catalog_path).await),
        Arc::new(JsonSubscriptionStore::new(config.subscriptions_path())),
        Arc::new(CountLedger::new(&config.data_dir)),
        Arc::new(acquirer),
        Notifier::new(telegram.clone()),
    ));

    let scheduler = Arc::new(Scheduler::new(
        tracker.clone(),
        SchedulerConfig::default().with_interval_minutes(config.check_interval_minutes),
    ));
    scheduler.start().await;

    let handler = Arc::new(CommandHandler::new(tracker.clone(), scheduler.clone()));
    let poller = UpdatePoller::new(telegram, handler, PollerConfig::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    if let Err(e) = poller_handle.await {
        tracing::warn!(error = %e, "Update poller ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
