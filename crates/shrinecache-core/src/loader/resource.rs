use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::cache::{fingerprint, ResponseCache};

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Where a loaded payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fetched from the network for this call (or a call it joined).
    Fresh,
    /// Served from a cache entry still within its TTL.
    Cached,
    /// Served from an expired entry because the refresh failed.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub payload: T,
    pub origin: Origin,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Loaded<T> {
    pub fn is_stale(&self) -> bool {
        self.origin == Origin::Stale
    }

    fn try_map<U>(self, f: impl FnOnce(T) -> Result<U, ApiError>) -> Result<Loaded<U>, ApiError> {
        Ok(Loaded {
            payload: f(self.payload)?,
            origin: self.origin,
            fetched_at: self.fetched_at,
        })
    }
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// A fetch only writes its result back while it is still the registered
/// in-flight entry for its key. Invalidation unregisters matching fetches.
#[derive(Default)]
struct LoaderState {
    in_flight: HashMap<String, InFlight>,
    next_id: u64,
}

/// Cache-first loader for one family of resources sharing a TTL.
///
/// Clone is cheap; clones share the cache and the in-flight map.
#[derive(Clone)]
pub struct ResourceLoader {
    client: ApiClient,
    cache: ResponseCache<Value>,
    state: Arc<Mutex<LoaderState>>,
}

impl ResourceLoader {
    pub fn new(client: ApiClient, cache: ResponseCache<Value>) -> Self {
        Self {
            client,
            cache,
            state: Arc::new(Mutex::new(LoaderState::default())),
        }
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    fn lock_state(state: &Mutex<LoaderState>) -> MutexGuard<'_, LoaderState> {
        state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load `path` with `params`, preferring a fresh cache entry.
    ///
    /// On a miss, joins an outstanding fetch for the same key or starts one.
    /// If the fetch fails with a transient error and any entry exists for the
    /// key, that entry is served as `Origin::Stale`.
    pub async fn load(&self, path: &str, params: &[(&str, &str)]) -> Result<Loaded<Value>, ApiError> {
        let key = fingerprint(path, params);

        if let Some(entry) = self.cache.get(&key) {
            return Ok(Loaded {
                payload: entry.payload,
                origin: Origin::Cached,
                fetched_at: entry.fetched_at,
            });
        }

        match self.fetch_shared(&key).await {
            Ok(payload) => Ok(Loaded {
                payload,
                origin: Origin::Fresh,
                fetched_at: self.cache.now(),
            }),
            Err(e) if e.is_transient() => match self.cache.get_stale_or_miss(&key) {
                Some(entry) => {
                    let age = entry.age_display(self.cache.now());
                    warn!(key = %key, error = %e, age = %age, "Refresh failed, serving stale data");
                    Ok(Loaded {
                        payload: entry.payload,
                        origin: Origin::Stale,
                        fetched_at: entry.fetched_at,
                    })
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// [`load`](Self::load) and deserialize the payload as `T`.
    pub async fn load_as<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Loaded<T>, ApiError> {
        self.load(path, params).await?.try_map(|payload| {
            serde_json::from_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))
        })
    }

    /// Join the outstanding fetch for `key`, or start one.
    ///
    /// The fetch runs on its own task: dropping every waiter does not cancel
    /// it, and its result still lands in the cache.
    fn fetch_shared(&self, key: &str) -> SharedFetch {
        let mut state = Self::lock_state(&self.state);
        if let Some(existing) = state.in_flight.get(key) {
            debug!(key, "Joining in-flight fetch");
            return existing.fetch.clone();
        }

        let id = state.next_id;
        state.next_id += 1;

        let client = self.client.clone();
        let cache = self.cache.clone();
        let shared_state = self.state.clone();
        let task_key = key.to_string();

        let handle = tokio::spawn(async move {
            let result = client.get_data(&task_key).await;

            let mut state = Self::lock_state(&shared_state);
            let registered = state.in_flight.get(&task_key).is_some_and(|f| f.id == id);
            if registered {
                state.in_flight.remove(&task_key);
            }
            if let Ok(ref payload) = result {
                if registered {
                    cache.set(&task_key, payload.clone());
                } else {
                    debug!(key = %task_key, "Invalidated while in flight, not caching");
                }
            }
            result
        });

        let fetch = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ApiError::Network(format!("Fetch task failed: {}", e))))
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// Send a mutation; on success every prefix in `invalidate` is dropped
    /// from the cache before this returns. On failure the cache is untouched.
    pub async fn mutate(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        invalidate: &[&str],
    ) -> Result<Value, ApiError> {
        let data = self.client.mutate(method, path, body).await?;
        for prefix in invalidate {
            self.invalidate(prefix);
        }
        Ok(data)
    }

    /// Drop cached entries and outstanding fetches whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut state = Self::lock_state(&self.state);
        state.in_flight.retain(|key, _| !key.starts_with(prefix));
        self.cache.invalidate_prefix(prefix)
    }

    pub fn clear(&self) {
        let mut state = Self::lock_state(&self.state);
        state.in_flight.clear();
        self.cache.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::clock::ManualClock;
    use crate::api::ErrorKind;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    const GALLERY_PAGE: &str = r#"{"success":true,"data":[{"id":1,"title":"Utsavam"}]}"#;

    fn loader(backend: &Arc<MockBackend>) -> (ResourceLoader, ManualClock) {
        let clock = ManualClock::default();
        let cache = ResponseCache::with_clock(Duration::minutes(5), Arc::new(clock.clone()));
        (ResourceLoader::new(ApiClient::new(backend.clone()), cache), clock)
    }

    #[tokio::test]
    async fn test_miss_then_hit_issues_one_request() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public?limit=12", 200, GALLERY_PAGE);
        let (loader, _clock) = loader(&backend);

        let first = loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        assert_eq!(first.origin, Origin::Fresh);
        assert_eq!(first.payload[0]["title"], "Utsavam");
        assert!(loader.cache().contains_key("gallery/public?limit=12"));

        let second = loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(second.payload, first.payload);
        assert_eq!(backend.call_count("GET", "gallery/public?limit=12"), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "management-team", 200, r#"{"success":true,"data":[1]}"#);
        backend.respond("GET", "management-team", 200, r#"{"success":true,"data":[1,2]}"#);
        let (loader, clock) = loader(&backend);

        loader.load("management-team", &[]).await.unwrap();
        clock.advance(Duration::minutes(5) + Duration::seconds(1));

        let refreshed = loader.load("management-team", &[]).await.unwrap();
        assert_eq!(refreshed.origin, Origin::Fresh);
        assert_eq!(refreshed.payload, serde_json::json!([1, 2]));
        assert_eq!(backend.call_count("GET", "management-team"), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_payload() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public?limit=12", 200, GALLERY_PAGE);
        let (loader, clock) = loader(&backend);

        let original = loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        clock.advance(Duration::minutes(6));
        backend.set_offline(true);

        let stale = loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        assert!(stale.is_stale());
        assert_eq!(stale.payload, original.payload);
        assert_eq!(stale.fetched_at, original.fetched_at);
        assert_eq!(
            loader.cache().get_stale_or_miss("gallery/public?limit=12").unwrap().payload,
            original.payload
        );
    }

    #[tokio::test]
    async fn test_failure_without_prior_entry_is_an_error() {
        let backend = Arc::new(MockBackend::new());
        backend.set_offline(true);
        let (loader, _clock) = loader(&backend);

        let err = loader.load("livestream", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(loader.cache().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_serve_stale() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/admin", 200, GALLERY_PAGE);
        backend.respond("GET", "gallery/admin", 401, "");
        let (loader, clock) = loader(&backend);

        loader.load("gallery/admin", &[]).await.unwrap();
        clock.advance(Duration::minutes(6));

        let err = loader.load("gallery/admin", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_fetch() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public", 200, GALLERY_PAGE);
        backend.set_delay(Some(StdDuration::from_millis(50)));
        let (loader, _clock) = loader(&backend);

        let (a, b) = tokio::join!(
            loader.load("gallery/public", &[]),
            loader.load("gallery/public", &[])
        );

        assert_eq!(a.unwrap().payload, b.unwrap().payload);
        assert_eq!(backend.call_count("GET", "gallery/public"), 1);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_populates_cache() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public", 200, GALLERY_PAGE);
        backend.set_delay(Some(StdDuration::from_millis(50)));
        let (loader, _clock) = loader(&backend);

        let abandoned =
            tokio::time::timeout(StdDuration::from_millis(5), loader.load("gallery/public", &[])).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert!(loader.cache().get("gallery/public").is_some());
    }

    #[tokio::test]
    async fn test_mutation_invalidates_before_returning() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public?limit=12", 200, GALLERY_PAGE);
        backend.respond("GET", "gallery/admin", 200, GALLERY_PAGE);
        backend.respond("POST", "gallery", 201, r#"{"success":true,"data":{"id":2}}"#);
        let (loader, _clock) = loader(&backend);

        loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        loader.load("gallery/admin", &[]).await.unwrap();

        loader
            .mutate(Method::POST, "gallery", Some(serde_json::json!({"title": "x"})), &["gallery/public"])
            .await
            .unwrap();

        assert!(loader.cache().get_stale_or_miss("gallery/public?limit=12").is_none());
        assert!(loader.cache().get("gallery/admin").is_some());

        let reread = loader.load("gallery/public", &[("limit", "12")]).await.unwrap();
        assert_eq!(reread.origin, Origin::Fresh);
        assert_eq!(backend.call_count("GET", "gallery/public?limit=12"), 2);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_cache_untouched() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public", 200, GALLERY_PAGE);
        backend.fail("DELETE", "gallery/1", ApiError::Timeout("60s".to_string()));
        let (loader, _clock) = loader(&backend);

        loader.load("gallery/public", &[]).await.unwrap();
        let err = loader
            .mutate(Method::DELETE, "gallery/1", None, &["gallery/public"])
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Timeout(_)));
        assert!(loader.cache().get("gallery/public").is_some());
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_is_not_overwritten() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "gallery/public", 200, GALLERY_PAGE);
        backend.set_delay(Some(StdDuration::from_millis(50)));
        let (loader, _clock) = loader(&backend);

        let pending = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load("gallery/public", &[]).await }
        });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        loader.invalidate("gallery");

        pending.await.unwrap().unwrap();
        assert!(!loader.cache().contains_key("gallery/public"));
    }

    #[tokio::test]
    async fn test_unrelated_invalidation_keeps_in_flight_result() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "livestream", 200, r#"{"success":true,"data":{"isLive":true}}"#);
        backend.set_delay(Some(StdDuration::from_millis(50)));
        let (loader, _clock) = loader(&backend);

        let pending = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load("livestream", &[]).await }
        });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        loader.invalidate("stats/dashboard");

        pending.await.unwrap().unwrap();
        assert!(loader.cache().contains_key("livestream"));

        let second = loader.load("livestream", &[]).await.unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(backend.call_count("GET", "livestream"), 1);
    }

    #[tokio::test]
    async fn test_load_as_deserializes_payload() {
        let backend = Arc::new(MockBackend::new());
        backend.respond("GET", "stats/dashboard", 200, r#"{"success":true,"data":[3,4]}"#);
        let (loader, _clock) = loader(&backend);

        let loaded: Loaded<Vec<u32>> = loader.load_as("stats/dashboard", &[]).await.unwrap();
        assert_eq!(loaded.payload, vec![3, 4]);

        let err = loader.load_as::<String>("stats/dashboard", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
