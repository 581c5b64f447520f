use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

const DEFAULT_FEED_ENDPOINT: &str = "http://mybusnow.njtransit.com/bustime/eta/getStopPredictionsETA.jsp";
const DEFAULT_PLACES_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub feed_endpoint: String,
    pub places_endpoint: String,
    pub places_api_key: Option<String>,
    pub redis_url: String,
    pub cache_backend: CacheBackend,
    pub upstream_timeout: Duration,
    pub cache_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = match var("BIND_ADDR") {
            Some(addr) => parse("BIND_ADDR", addr)?,
            None => {
                let port: u16 = match var("PORT") {
                    Some(port) => parse("PORT", port)?,
                    None => DEFAULT_PORT,
                };
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let cache_backend = match var("CACHE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => CacheBackend::Redis,
            Some(b) if b == "redis" => CacheBackend::Redis,
            Some(b) if b == "memory" => CacheBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid { name: "CACHE_BACKEND", value: other });
            }
        };

        let upstream_timeout_ms: u64 = match var("UPSTREAM_TIMEOUT_MS") {
            Some(v) => parse("UPSTREAM_TIMEOUT_MS", v)?,
            None => 10_000,
        };
        let cache_timeout_ms: u64 = match var("CACHE_TIMEOUT_MS") {
            Some(v) => parse("CACHE_TIMEOUT_MS", v)?,
            None => 2_000,
        };
        let log_level = match var("LOG_LEVEL") {
            Some(v) => parse("LOG_LEVEL", v)?,
            None => Level::INFO,
        };

        let feed_endpoint = endpoint("FEED_ENDPOINT", var("FEED_ENDPOINT"), DEFAULT_FEED_ENDPOINT)?;
        let places_endpoint = endpoint("PLACES_ENDPOINT", var("PLACES_ENDPOINT"), DEFAULT_PLACES_ENDPOINT)?;

        Ok(Config {
            bind_addr,
            feed_endpoint,
            places_endpoint,
            places_api_key: var("PLACES_API_KEY"),
            redis_url: var("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            cache_backend,
            upstream_timeout: Duration::from_millis(upstream_timeout_ms),
            cache_timeout: Duration::from_millis(cache_timeout_ms),
            log_level,
        })
    }
}

// Endpoints must be absolute http(s) urls; a bad one would fail every request later.
fn endpoint(name: &'static str, value: Option<String>, default: &str) -> Result<String, ConfigError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_else(|| default.to_string());
    match Url::parse(&value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { name, value })
}
