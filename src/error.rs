use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Transport failure, timeout or a non-2xx answer from the prediction feed
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The feed answered but not in the stop/pre shape we understand
    #[error("Upstream malformed: {0}")]
    UpstreamMalformed(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Places lookup failed: {0}")]
    PlacesUpstream(String),

    #[error("Places lookup is not configured")]
    PlacesNotConfigured,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PlacesUpstream(_) | ProxyError::UpstreamMalformed(_) => StatusCode::BAD_GATEWAY,
            ProxyError::PlacesNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamUnavailable(_) | ProxyError::CacheUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
