use crate::cache::{CacheStore, MemoryCache, RedisCache};
use crate::config::{CacheBackend, Config};
use crate::error::ProxyError;
use crate::places::{NearbyRequest, PlacesClient};
use crate::predictions::{PredictionService, Predictions};
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub predictions: PredictionService,
    pub places: PlacesClient,
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    stop: String,
}

#[derive(Debug, Deserialize)]
struct StopAndRouteRequest {
    stop: String,
    route: String,
}

// Redis being down at startup shouldn't keep the proxy down; we lose the fallback
// copies across restarts, nothing else.
pub async fn connect_cache(config: &Config) -> Arc<dyn CacheStore> {
    match config.cache_backend {
        CacheBackend::Memory => {
            info!("Using in-memory cache");
            Arc::new(MemoryCache::new())
        }
        CacheBackend::Redis => {
            match tokio::time::timeout(config.cache_timeout, RedisCache::connect(&config.redis_url)).await {
                Ok(Ok(cache)) => Arc::new(cache),
                Ok(Err(e)) => {
                    warn!("{}; falling back to in-memory cache", e);
                    Arc::new(MemoryCache::new())
                }
                Err(_) => {
                    warn!(
                        "No answer from redis at {} within {:?}; falling back to in-memory cache",
                        config.redis_url, config.cache_timeout
                    );
                    Arc::new(MemoryCache::new())
                }
            }
        }
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/predictions/byStop", post(predictions_by_stop))
        .route("/predictions/byStopAndRoute", post(predictions_by_stop_and_route))
        .route("/places/nearby", post(places_nearby))
        // paths the deployed apps still call
        .route("/rest/stop", post(predictions_by_stop))
        .route("/rest/stop/byRoute", post(predictions_by_stop_and_route))
        .route("/rest/getPlaces", post(places_nearby))
        .with_state(state)
        .layer(cors)
}

fn required(name: &str, value: &str) -> Result<(), ProxyError> {
    if value.trim().is_empty() {
        return Err(ProxyError::BadRequest(format!("{name} must not be empty")));
    }
    Ok(())
}

async fn predictions_by_stop(
    State(state): State<AppState>,
    Json(body): Json<StopRequest>,
) -> Result<Json<Predictions>, ProxyError> {
    required("stop", &body.stop)?;
    info!("Predictions requested for stop {}", body.stop);
    Ok(Json(state.predictions.by_stop(&body.stop).await))
}

async fn predictions_by_stop_and_route(
    State(state): State<AppState>,
    Json(body): Json<StopAndRouteRequest>,
) -> Result<Json<Predictions>, ProxyError> {
    required("stop", &body.stop)?;
    required("route", &body.route)?;
    info!("Predictions requested for stop {} route {}", body.stop, body.route);
    Ok(Json(state.predictions.by_stop_and_route(&body.stop, &body.route).await))
}

async fn places_nearby(
    State(state): State<AppState>,
    Json(body): Json<NearbyRequest>,
) -> Result<Json<Value>, ProxyError> {
    info!("Nearby places requested for types {}", body.types);
    state.places.nearby(&body).await.map(Json)
}
