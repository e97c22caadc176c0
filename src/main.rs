use anyhow::Context;
use crypto_tracker::config::TrackerConfig;
use crypto_tracker::services::asset_store::AssetStore;
use crypto_tracker::services::coingecko::CoinGeckoService;
use crypto_tracker::services::orchestrator::{Orchestrator, OrchestratorConfig};
use crypto_tracker::services::push_channel::{PushChannel, TungsteniteTransport};
use crypto_tracker::{build_router, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crypto_tracker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = TrackerConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        assets = %config.asset_ids.join(","),
        poll_secs = config.poll_interval.as_secs(),
        push = config.push_enabled,
        "Starting crypto tracker"
    );

    let coingecko = CoinGeckoService::new(
        config.coingecko_base_url.clone(),
        config.coingecko_api_key.clone(),
        config.asset_ids.clone(),
    )
    .context("failed to build CoinGecko client")?;

    let channel = config
        .push_enabled
        .then(|| PushChannel::new(config.push.clone(), Arc::new(TungsteniteTransport)));
    let channel_status = channel.as_ref().map(|(channel, _)| channel.status());

    let store = AssetStore::shared();
    let mut orchestrator = Orchestrator::spawn(
        OrchestratorConfig::from(&config),
        store.clone(),
        Arc::new(coingecko),
        channel,
    );

    let app = build_router(AppState {
        store,
        channel: channel_status,
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    orchestrator.dispose().await;

    served.context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
