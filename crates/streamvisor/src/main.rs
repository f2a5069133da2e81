use anyhow::{Context, Result};
use std::sync::Arc;
use streamvisor::{Bot, CommandRouter, PlatformProcessManagerFactory, ProfileStore, Settings, TelegramClient};
use streamvisor_core::{ProcessManagerFactory, StreamSupervisor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "streamvisor=info,streamvisor_core=info,streamvisor_unix=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::from_env().context("Failed to load settings")?;
    info!(
        "Starting on {} with ffmpeg at {} (max {} streams per user)",
        PlatformProcessManagerFactory::platform_name(),
        settings.supervisor.transcoder_path,
        settings.supervisor.max_streams_per_owner
    );

    let client = Arc::new(TelegramClient::new(&settings.bot_token)?);
    let manager = Arc::new(PlatformProcessManagerFactory::create_process_manager());
    let supervisor = StreamSupervisor::new(settings.supervisor.clone(), manager, client.clone())?;
    let profiles = ProfileStore::load(&settings.profiles_file);
    let router = Arc::new(CommandRouter::new(
        supervisor.clone(),
        profiles,
        settings.admin_ids.clone(),
    ));
    let bot = Bot::new(client, router, settings.retry.clone())?;

    let cancel = CancellationToken::new();
    let mut bot_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { bot.run(cancel).await }
    });

    let bot_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            cancel.cancel();
            None
        }
        result = &mut bot_task => Some(result),
    };

    let stopped = supervisor.shutdown().await;
    info!("Stopped {} streams", stopped.len());

    let bot_result = match bot_result {
        Some(result) => result,
        None => bot_task.await,
    };
    match bot_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Bot stopped with an error: {e:#}");
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("Bot task failed: {e}")),
    }
}
