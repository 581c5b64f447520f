//! Fetch, normalize, select, write through to the cache, and fall back to the cache
//! when the feed can't be used.

use crate::cache::{CacheKey, CacheStore};
use crate::error::ProxyError;
use crate::normalize::{normalize, NormalizedFeed, Prediction};
use crate::select::{first_predictions, first_predictions_for_route};
use crate::upstream::{feed_url, Fetcher};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Answer when the feed is down and nothing was cached for the key.
pub const NO_CURRENT_PREDICTIONS: &str = "No Current Predictions";

/// What the prediction endpoints answer with: a JSON array of predictions or a bare
/// JSON string message. The cache stores exactly this JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predictions {
    List(Vec<Prediction>),
    Message(String),
}

enum Selection<'a> {
    AllRoutes,
    Route(&'a str),
}

#[derive(Clone)]
pub struct PredictionService {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn CacheStore>,
    feed_endpoint: String,
    cache_timeout: Duration,
}

impl PredictionService {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheStore>,
        feed_endpoint: impl Into<String>,
        cache_timeout: Duration,
    ) -> Self {
        Self { fetcher, cache, feed_endpoint: feed_endpoint.into(), cache_timeout }
    }

    pub async fn by_stop(&self, stop: &str) -> Predictions {
        self.respond(stop, CacheKey::stop(stop), Selection::AllRoutes).await
    }

    pub async fn by_stop_and_route(&self, stop: &str, route: &str) -> Predictions {
        self.respond(stop, CacheKey::stop_and_route(stop, route), Selection::Route(route)).await
    }

    async fn respond(&self, stop: &str, key: CacheKey, selection: Selection<'_>) -> Predictions {
        match self.fetch_fresh(stop, &selection).await {
            Ok(fresh) => {
                self.store(&key, &fresh).await;
                fresh
            }
            Err(e) => {
                match &e {
                    ProxyError::UpstreamMalformed(_) => error!("Feed for stop {} is malformed: {}", stop, e),
                    _ => warn!("Feed for stop {} unavailable: {}", stop, e),
                }
                self.cached(&key).await
            }
        }
    }

    async fn fetch_fresh(&self, stop: &str, selection: &Selection<'_>) -> Result<Predictions, ProxyError> {
        let url = feed_url(&self.feed_endpoint, stop)?;
        let response = self.fetcher.fetch(&url).await?;
        if !response.is_success() {
            return Err(ProxyError::UpstreamUnavailable(format!("feed answered {}", response.status)));
        }

        Ok(match normalize(&response.body)? {
            NormalizedFeed::Sentinel(message) => Predictions::Message(message),
            NormalizedFeed::Predictions(all) => Predictions::List(match selection {
                Selection::AllRoutes => first_predictions(&all),
                Selection::Route(route) => first_predictions_for_route(&all, route),
            }),
        })
    }

    // Write failures only cost us the fallback copy, the fresh answer still goes out.
    async fn store(&self, key: &CacheKey, predictions: &Predictions) {
        let encoded = match serde_json::to_string(predictions) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Could not encode predictions for key {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.with_deadline(self.cache.set(key, encoded)).await {
            warn!("Skipping cache write for key {}: {}", key, e);
        }
    }

    // Unreadable cache is treated as a miss.
    async fn cached(&self, key: &CacheKey) -> Predictions {
        match self.with_deadline(self.cache.exists(key)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Cache miss for key {}", key);
                return Predictions::Message(NO_CURRENT_PREDICTIONS.to_string());
            }
            Err(e) => {
                warn!("Cache lookup failed for key {}: {}", key, e);
                return Predictions::Message(NO_CURRENT_PREDICTIONS.to_string());
            }
        }

        match self.with_deadline(self.cache.get(key)).await {
            Ok(Some(raw)) => {
                debug!("Serving cached predictions for key {}", key);
                decode_cached(raw)
            }
            Ok(None) => Predictions::Message(NO_CURRENT_PREDICTIONS.to_string()),
            Err(e) => {
                warn!("Cache read failed for key {}: {}", key, e);
                Predictions::Message(NO_CURRENT_PREDICTIONS.to_string())
            }
        }
    }

    async fn with_deadline<T>(&self, op: impl Future<Output = Result<T, ProxyError>>) -> Result<T, ProxyError> {
        tokio::time::timeout(self.cache_timeout, op)
            .await
            .map_err(|_| ProxyError::CacheUnavailable(format!("no answer within {:?}", self.cache_timeout)))?
    }
}

// Older entries hold the raw sentinel text rather than JSON; replay those as-is.
fn decode_cached(raw: String) -> Predictions {
    match serde_json::from_str::<Predictions>(&raw) {
        Ok(predictions) => predictions,
        Err(_) => {
            info!("Cached value is not JSON, replaying it as a message");
            Predictions::Message(raw)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::upstream::UpstreamResponse;
    use async_trait::async_trait;
    use reqwest::{StatusCode, Url};
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers each fetch with the next scripted result and records requested URLs.
    pub(crate) struct ScriptedFetcher {
        script: Mutex<Vec<Result<UpstreamResponse, ProxyError>>>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(script: Vec<Result<UpstreamResponse, ProxyError>>) -> Arc<Self> {
            let mut script = script;
            script.reverse();
            Arc::new(Self { script: Mutex::new(script), requested: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, ProxyError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProxyError::UpstreamUnavailable("script exhausted".into())))
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn exists(&self, _key: &CacheKey) -> Result<bool, ProxyError> {
            Err(ProxyError::CacheUnavailable("connection reset".into()))
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<String>, ProxyError> {
            Err(ProxyError::CacheUnavailable("connection reset".into()))
        }

        async fn set(&self, _key: &CacheKey, _value: String) -> Result<(), ProxyError> {
            Err(ProxyError::CacheUnavailable("connection reset".into()))
        }
    }

    pub(crate) fn ok(body: impl Into<String>) -> Result<UpstreamResponse, ProxyError> {
        Ok(UpstreamResponse { status: StatusCode::OK, body: body.into() })
    }

    pub(crate) fn refused() -> Result<UpstreamResponse, ProxyError> {
        Err(ProxyError::UpstreamUnavailable("connection refused".into()))
    }

    pub(crate) fn pre(route: &str, vehicle: usize) -> String {
        format!(
            "<pre><pt>{vehicle}</pt><pu>MINUTES</pu><fd>{route} NEWARK</fd><v>{vehicle}</v><rn>{route}</rn><rd>{route}</rd><zone></zone></pre>"
        )
    }

    pub(crate) fn feed(entries: &[String]) -> String {
        format!("<?xml version=\"1.0\"?><stop><id>1234</id>{}</stop>", entries.concat())
    }

    fn service(fetcher: Arc<ScriptedFetcher>, cache: Arc<dyn CacheStore>) -> PredictionService {
        PredictionService::new(fetcher, cache, "http://feed.example/eta.jsp", Duration::from_secs(1))
    }

    fn list(predictions: Predictions) -> Vec<Prediction> {
        match predictions {
            Predictions::List(list) => list,
            other => panic!("expected a list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_is_selected_and_written_through() {
        let entries: Vec<_> = (0..15).map(|i| pre("108", i)).collect();
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&entries))]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher.clone(), cache.clone());

        let response = list(svc.by_stop("1234").await);

        assert_eq!(response.len(), 10);
        assert_eq!(
            fetcher.requested.lock().unwrap().as_slice(),
            ["http://feed.example/eta.jsp?route=all&stop=1234"]
        );
        let stored = cache.get(&CacheKey::stop("1234")).await.unwrap().unwrap();
        assert_eq!(stored, serde_json::to_string(&response).unwrap());
    }

    #[tokio::test]
    async fn single_prediction_is_answered_and_cached_as_array() {
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&[pre("108", 7)]))]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher, cache.clone());

        let response = svc.by_stop("1234").await;
        let expected = json!([{
            "pt": "7", "pu": "MINUTES", "fd": "108 NEWARK", "v": "7",
            "rn": "108", "rd": "108", "zone": {}
        }]);

        assert_eq!(serde_json::to_value(&response).unwrap(), expected);
        let stored = cache.get(&CacheKey::stop("1234")).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&stored).unwrap(), expected);
    }

    #[tokio::test]
    async fn route_request_keeps_first_ten_matches_under_combined_key() {
        // 15 entries, 12 on route 108
        let entries: Vec<_> = (0..15)
            .map(|i| if i % 5 == 2 { pre("62", i) } else { pre("108", i) })
            .collect();
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&entries))]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher, cache.clone());

        let response = list(svc.by_stop_and_route("1234", "108").await);

        let vehicles: Vec<_> = response.iter().map(|p| p.vehicle().unwrap()).collect();
        assert_eq!(vehicles, vec!["0", "1", "3", "4", "5", "6", "8", "9", "10", "11"]);
        assert!(cache.exists(&CacheKey::stop_and_route("1234", "108")).await.unwrap());
        assert!(!cache.exists(&CacheKey::stop("1234")).await.unwrap());
    }

    #[tokio::test]
    async fn single_prediction_on_route_request_is_still_filtered() {
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&[pre("62", 1)]))]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher, cache.clone());

        assert_eq!(svc.by_stop_and_route("1234", "108").await, Predictions::List(vec![]));
        assert!(cache.exists(&CacheKey::stop_and_route("1234", "108")).await.unwrap());
    }

    #[tokio::test]
    async fn failure_replays_last_good_list() {
        let entries: Vec<_> = (0..3).map(|i| pre("108", i)).collect();
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&entries)), refused()]);
        let svc = service(fetcher, Arc::new(MemoryCache::new()));

        let fresh = svc.by_stop("1234").await;
        let fallback = svc.by_stop("1234").await;

        assert_eq!(fallback, fresh);
    }

    #[tokio::test]
    async fn sentinel_is_answered_bare_and_replayed() {
        let body = "<stop><id>1234</id><noPredictionMessage>No arrival times</noPredictionMessage></stop>";
        let fetcher = ScriptedFetcher::new(vec![ok(body), refused()]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher, cache.clone());

        let fresh = svc.by_stop("1234").await;
        assert_eq!(serde_json::to_value(&fresh).unwrap(), json!("No arrival times"));

        let fallback = svc.by_stop("1234").await;
        assert_eq!(fallback, Predictions::Message("No arrival times".to_string()));
    }

    #[tokio::test]
    async fn failure_without_cache_entry_answers_no_current_predictions() {
        let fetcher = ScriptedFetcher::new(vec![refused()]);
        let svc = service(fetcher, Arc::new(MemoryCache::new()));

        let response = svc.by_stop("5678").await;
        assert_eq!(serde_json::to_string(&response).unwrap(), "\"No Current Predictions\"");
    }

    #[tokio::test]
    async fn non_success_status_falls_back() {
        let fetcher = ScriptedFetcher::new(vec![
            ok(feed(&[pre("108", 1)])),
            Ok(UpstreamResponse { status: StatusCode::BAD_GATEWAY, body: feed(&[pre("108", 2)]) }),
        ]);
        let svc = service(fetcher, Arc::new(MemoryCache::new()));

        let fresh = svc.by_stop("1234").await;
        assert_eq!(svc.by_stop("1234").await, fresh);
    }

    #[tokio::test]
    async fn malformed_feed_falls_back_without_overwriting_cache() {
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&[pre("108", 1)])), ok("<html>maintenance</html>")]);
        let cache = Arc::new(MemoryCache::new());
        let svc = service(fetcher, cache.clone());

        let fresh = svc.by_stop("1234").await;
        let stored = cache.get(&CacheKey::stop("1234")).await.unwrap();

        assert_eq!(svc.by_stop("1234").await, fresh);
        assert_eq!(cache.get(&CacheKey::stop("1234")).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn broken_cache_degrades_instead_of_failing() {
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&[pre("108", 1)])), refused()]);
        let svc = service(fetcher, Arc::new(BrokenCache));

        assert_eq!(list(svc.by_stop("1234").await).len(), 1);
        assert_eq!(svc.by_stop("1234").await, Predictions::Message(NO_CURRENT_PREDICTIONS.to_string()));
    }

    #[tokio::test]
    async fn legacy_raw_text_entry_is_replayed_verbatim() {
        let cache = Arc::new(MemoryCache::new());
        cache.set(&CacheKey::stop("1234"), "No arrival times".to_string()).await.unwrap();
        let svc = service(ScriptedFetcher::new(vec![refused()]), cache);

        assert_eq!(svc.by_stop("1234").await, Predictions::Message("No arrival times".to_string()));
    }

    #[tokio::test]
    async fn route_and_stop_fallbacks_use_their_own_keys() {
        let entries: Vec<_> = vec![pre("108", 1), pre("62", 2)];
        let fetcher = ScriptedFetcher::new(vec![ok(feed(&entries)), refused(), refused()]);
        let svc = service(fetcher, Arc::new(MemoryCache::new()));

        let fresh = svc.by_stop_and_route("1234", "62").await;
        assert_eq!(list(fresh.clone()).len(), 1);

        assert_eq!(svc.by_stop_and_route("1234", "62").await, fresh);
        assert_eq!(svc.by_stop("1234").await, Predictions::Message(NO_CURRENT_PREDICTIONS.to_string()));
    }
}
