use crate::error::ProxyError;
use crate::upstream::Fetcher;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Number, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Clients send coordinates either as JSON numbers or as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Number(Number),
    Text(String),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Number(n) => write!(f, "{n}"),
            QueryValue::Text(s) => f.write_str(s.trim()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearbyRequest {
    pub latitude: QueryValue,
    pub longitude: QueryValue,
    pub radius: QueryValue,
    pub types: String,
}

#[derive(Clone)]
pub struct PlacesClient {
    fetcher: Arc<dyn Fetcher>,
    endpoint: String,
    api_key: Option<String>,
}

impl PlacesClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self { fetcher, endpoint: endpoint.into(), api_key }
    }

    // Passes the places API's JSON through untouched
    pub async fn nearby(&self, request: &NearbyRequest) -> Result<Value, ProxyError> {
        let api_key = self.api_key.as_deref().ok_or(ProxyError::PlacesNotConfigured)?;
        let url = nearby_url(&self.endpoint, request, api_key)?;

        let response = self.fetcher.fetch(&url).await.map_err(|e| {
            warn!("Places lookup failed: {}", e);
            ProxyError::PlacesUpstream(e.to_string())
        })?;
        if !response.is_success() {
            warn!("Places API answered {}", response.status);
            return Err(ProxyError::PlacesUpstream(format!("places API answered {}", response.status)));
        }

        serde_json::from_str(&response.body)
            .map_err(|e| ProxyError::PlacesUpstream(format!("places API sent invalid JSON: {e}")))
    }
}

pub fn nearby_url(endpoint: &str, request: &NearbyRequest, api_key: &str) -> Result<Url, ProxyError> {
    for (name, value) in [("latitude", &request.latitude), ("longitude", &request.longitude), ("radius", &request.radius)] {
        if value.to_string().is_empty() {
            return Err(ProxyError::BadRequest(format!("{name} must not be empty")));
        }
    }

    let location = format!("{},{}", request.latitude, request.longitude);
    let radius = request.radius.to_string();
    Url::parse_with_params(
        endpoint,
        &[
            ("location", location.as_str()),
            ("radius", radius.as_str()),
            ("types", request.types.as_str()),
            ("key", api_key),
        ],
    )
    .map_err(|e| ProxyError::BadRequest(format!("cannot build places url: {e}")))
}
