mod extract;
mod fetch;
mod http;
mod now;
mod playback;
mod poller;
mod proxy;
mod status;

use std::sync::Arc;

use onair_proto::config::Config;
use onair_proto::state::StateManager;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::fetch::Fetcher;
use crate::http::ApiState;
use crate::now::NowCollector;
use crate::playback::{HttpConnector, PlaybackController};
use crate::poller::Poller;
use crate::status::StatusCollector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_path = onair_proto::platform::log_file();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,onair=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!(
        "Station: {} ({} relays, poll every {:?})",
        config.station.name,
        config.relays.len(),
        config.poll.interval()
    );

    let fetcher = Fetcher::new(&config.station.user_agent)?;
    let state_manager = Arc::new(StateManager::new());

    let status = Arc::new(StatusCollector::from_config(&config, &fetcher)?);
    let now = Arc::new(NowCollector::new(
        fetcher.clone(),
        config.station.now_url.clone(),
        config.timeouts.now(),
    ));
    let connector = Arc::new(HttpConnector::new(
        fetcher.client().clone(),
        config.timeouts.stream_connect(),
    ));
    let playback = PlaybackController::new(connector, config.station.stream_url.clone(), state_manager.clone());

    let poller = Poller::new(
        status.clone(),
        now.clone(),
        state_manager.clone(),
        playback.clone(),
        config.poll.interval(),
    )
    .start();

    let shutdown = CancellationToken::new();
    let server = http::start_server(
        &config.http.bind_address,
        config.http.port,
        ApiState {
            state_manager,
            status,
            now,
            playback,
        },
        shutdown.clone(),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // Pausing first ends open /stream responses so graceful shutdown can finish.
    poller.shutdown().await;
    shutdown.cancel();
    server.await?;

    info!("Daemon stopped");
    Ok(())
}
