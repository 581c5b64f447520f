use busproxy::config::Config;
use busproxy::places::PlacesClient;
use busproxy::predictions::PredictionService;
use busproxy::server::{app, connect_cache, AppState};
use busproxy::upstream::HttpFetcher;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt().with_max_level(config.log_level).init();

    let fetcher = Arc::new(HttpFetcher::new(config.upstream_timeout)?);
    let cache = connect_cache(&config).await;

    let state = AppState {
        predictions: PredictionService::new(
            fetcher.clone(),
            cache,
            config.feed_endpoint.clone(),
            config.cache_timeout,
        ),
        places: PlacesClient::new(fetcher, config.places_endpoint.clone(), config.places_api_key.clone()),
    };
    if config.places_api_key.is_none() {
        warn!("PLACES_API_KEY is not set, /places/nearby will answer 503");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server is running on http://{}", config.bind_addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

