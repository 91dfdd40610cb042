//! Authenticated API client shared by the session and every data loader.
//!
//! This is the single interception point for the REST API: it attaches the
//! bearer token, reports every `401` to the session, maps failure statuses to
//! `ApiError`, and unwraps the `{success, data, message}` response envelope.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, HttpBackend, RequestKind};
use super::ApiError;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay for rate limiting.
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Bridge between the transport and whoever owns the credentials.
pub trait AuthHook: Send + Sync {
    /// Token to send as `Authorization: Bearer <token>`, if any.
    fn bearer_token(&self) -> Option<String>;

    /// Called for every `401` response, whichever call site issued it.
    fn on_unauthorized(&self);
}

/// API client for the shrine REST API.
/// Clone is cheap - the backend and hook are shared.
#[derive(Clone)]
pub struct ApiClient {
    backend: Arc<dyn HttpBackend>,
    hook: Option<Arc<dyn AuthHook>>,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a client without credentials
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            hook: None,
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    /// Create a client sharing this backend but reporting to `hook`.
    pub fn with_auth_hook(&self, hook: Arc<dyn AuthHook>) -> Self {
        Self {
            backend: self.backend.clone(),
            hook: Some(hook),
            initial_backoff: self.initial_backoff,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn authorize(&self, mut request: ApiRequest) -> ApiRequest {
        if request.header(header::AUTHORIZATION.as_str()).is_some() {
            return request;
        }
        if let Some(token) = self.hook.as_ref().and_then(|h| h.bearer_token()) {
            request
                .headers
                .push((header::AUTHORIZATION.as_str().to_string(), format!("Bearer {}", token)));
        }
        request
    }

    /// Send a request, returning the response only for 2xx statuses.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self.authorize(request);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.backend.execute(request.clone()).await?;

            if response.status == 401 {
                warn!(path = %request.path, "Unauthorized response, clearing session");
                if let Some(ref hook) = self.hook {
                    hook.on_unauthorized();
                }
            }

            if response.is_ok() {
                return Ok(response);
            }

            if response.status == 429 && request.kind == RequestKind::Read {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                let backoff_ms = backoff.as_millis() as u64;
                warn!(path = %request.path, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            return Err(ApiError::from_status(response.status, &response.body));
        }
    }

    /// GET `path` and return the envelope's `data`.
    pub async fn get_data(&self, path: &str) -> Result<Value, ApiError> {
        self.send_data(ApiRequest::get(path)).await
    }

    /// Send `request` and return the envelope's `data`.
    pub async fn send_data(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let response = self.send(request).await?;
        Self::unwrap_envelope(&response)
    }

    /// Send `request` and deserialize the envelope's `data` as `T`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let data = self.send_data(request).await?;
        serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Mutation helper with the long timeout.
    pub async fn mutate(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.send_data(ApiRequest::mutation(method, path, body)).await
    }

    /// Extract `data` from a `{success, data, message}` body.
    ///
    /// Bodies that are not envelopes are returned whole; an empty body is
    /// `null`. `success: false` is a rejection even with a 2xx status.
    pub fn unwrap_envelope(response: &ApiResponse) -> Result<Value, ApiError> {
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed JSON body: {}", e)))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => return Ok(other),
        };

        match object.get("success").and_then(Value::as_bool) {
            Some(false) => {
                let message = object
                    .get("message")
                    .or_else(|| object.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("Request was not successful")
                    .to_string();
                debug!(status = response.status, %message, "Envelope reported failure");
                Err(ApiError::Validation {
                    status: response.status,
                    message,
                })
            }
            Some(true) => Ok(object.remove("data").unwrap_or(Value::Null)),
            None => Ok(Value::Object(object)),
        }
    }
}
