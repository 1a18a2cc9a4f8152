use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_cache::config::Config;
use feed_cache::fetcher::{start_background_refresh, Fetcher};
use feed_cache::routes::{self, AppState};
use feed_cache::store::CacheStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feed_cache=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Arc::new(Config::load(&config_path)?);
    info!(
        "Loaded {} sources from {}",
        config.sources.len(),
        config_path
    );

    let store = Arc::new(CacheStore::new(config.cache_dir.clone()));
    info!("Caching to {}", store.dir().display());

    let fetcher = Arc::new(Fetcher::new(store.clone(), config.fetch_timeout())?);

    // Start one refresh loop per source
    let cancel = CancellationToken::new();
    let refresh_tasks = start_background_refresh(
        fetcher.clone(),
        &config.sources,
        config.refresh_interval(),
        cancel.clone(),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        fetcher,
    });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for task in refresh_tasks {
        if let Err(e) = task.await {
            error!("Refresh task ended abnormally: {}", e);
        }
    }
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
