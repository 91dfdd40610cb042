//! Scripted in-memory backend for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{ApiRequest, ApiResponse, HttpBackend};
use super::ApiError;

type Route = (String, String);

enum Scripted {
    Respond(ApiResponse),
    Fail(ApiError),
}

/// Replies from per-route queues. The last scripted reply for a route
/// repeats; unknown routes answer 404.
#[derive(Default)]
pub(crate) struct MockBackend {
    routes: Mutex<HashMap<Route, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

fn route(method: &str, path: &str) -> Route {
    (method.to_uppercase(), path.trim_start_matches('/').to_string())
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: &str, path: &str, status: u16, body: &str) {
        self.push(method, path, Scripted::Respond(ApiResponse::new(status, body)));
    }

    pub(crate) fn fail(&self, method: &str, path: &str, error: ApiError) {
        self.push(method, path, Scripted::Fail(error));
    }

    /// Every request fails with a network error while offline.
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, method: &str, path: &str) -> usize {
        let key = route(method, path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| route(r.method.as_str(), &r.path) == key)
            .count()
    }

    fn push(&self, method: &str, path: &str, reply: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(route(method, path))
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, key: &Route) -> Result<ApiResponse, ApiError> {
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(key) else {
            return Ok(ApiResponse::new(404, r#"{"message":"Not found"}"#));
        };
        let reply = if queue.len() > 1 { queue.pop_front() } else { None };
        match reply.as_ref().or_else(|| queue.front()) {
            Some(Scripted::Respond(r)) => Ok(r.clone()),
            Some(Scripted::Fail(e)) => Err(e.clone()),
            None => Ok(ApiResponse::new(404, "")),
        }
    }
}

#[async_trait]
impl HttpBackend for MockBackend {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let key = route(request.method.as_str(), &request.path);
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".to_string()));
        }
        self.next_reply(&key)
    }
}
