use crate::error::ProxyError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// One outbound GET. Callers decide what a non-2xx status means.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, ProxyError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, ProxyError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("GET {} failed: {e}", url.path())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("reading body of {} failed: {e}", url.path())))?;

        Ok(UpstreamResponse { status, body })
    }
}

// Feed URL for every route at a stop, e.g. `...ETA.jsp?route=all&stop=1234`
pub fn feed_url(feed_endpoint: &str, stop: &str) -> Result<Url, ProxyError> {
    Url::parse_with_params(feed_endpoint, &[("route", "all"), ("stop", stop)])
        .map_err(|e| ProxyError::BadRequest(format!("cannot build feed url for stop '{stop}': {e}")))
}
