use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reqwest::{header, Method};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::store::{KeyValueStore, PRINCIPAL_KEY, TOKEN_KEY};
use crate::api::resources::{AUTH_LOGIN, AUTH_LOGOUT, AUTH_VERIFY};
use crate::api::{ApiClient, ApiError, ApiRequest, AuthHook};
use crate::models::{LoginRequest, LoginResponse, Principal};

/// Buffered state transitions per subscriber
const EVENT_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    /// A token is being checked; UIs should show a neutral loading state.
    Verifying,
    Authenticated,
    /// Transient: the server rejected the token. Always followed by `Anonymous`.
    Expired,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user: Principal,
}

#[derive(Debug)]
struct SessionData {
    token: Option<String>,
    principal: Option<Principal>,
    state: SessionState,
}

/// State shared between the manager and the `ApiClient` hook.
struct SessionShared {
    data: RwLock<SessionData>,
    store: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<SessionState>,
}

impl SessionShared {
    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, data: &mut SessionData, state: SessionState) {
        if data.state == state {
            return;
        }
        debug!(from = ?data.state, to = ?state, "Session state change");
        data.state = state;
        // No subscribers is fine
        let _ = self.events.send(state);
    }

    /// Drop token and principal locally and in the store.
    fn clear(&self, data: &mut SessionData, expired: bool) {
        let had_session = data.token.is_some() || data.state != SessionState::Anonymous;
        data.token = None;
        data.principal = None;
        if expired && had_session {
            self.transition(data, SessionState::Expired);
        }
        self.transition(data, SessionState::Anonymous);

        for key in [TOKEN_KEY, PRINCIPAL_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(error = %e, key, "Failed to remove stored session entry");
            }
        }
    }

    fn persist(&self, token: &str, principal: &Principal) {
        if let Err(e) = self.store.set(TOKEN_KEY, token) {
            warn!(error = %e, "Failed to save session token");
        }
        self.persist_principal(principal);
    }

    fn persist_principal(&self, principal: &Principal) {
        match serde_json::to_string(principal) {
            Ok(json) => {
                if let Err(e) = self.store.set(PRINCIPAL_KEY, &json) {
                    warn!(error = %e, "Failed to save principal snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize principal snapshot"),
        }
    }
}

impl AuthHook for SessionShared {
    fn bearer_token(&self) -> Option<String> {
        self.read().token.clone()
    }

    fn on_unauthorized(&self) {
        let mut data = self.write();
        if data.token.is_none() {
            return;
        }
        info!("Session token rejected by server, signing out");
        self.clear(&mut data, true);
    }
}

/// Owns the admin token and principal for one client.
///
/// Every request sent through [`SessionManager::client`] carries the token,
/// and a `401` on any of them clears the session.
pub struct SessionManager {
    shared: Arc<SessionShared>,
    client: ApiClient,
}

impl SessionManager {
    /// Create a manager, restoring a stored token if there is one.
    ///
    /// A restored token puts the session in `Verifying` until
    /// [`resume`](Self::resume) or [`verify`](Self::verify) settles it.
    pub fn new(client: ApiClient, store: Arc<dyn KeyValueStore>) -> Self {
        let token = match store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to load stored session, starting signed out");
                None
            }
        };
        let state = if token.is_some() {
            debug!("Stored session token found");
            SessionState::Verifying
        } else {
            SessionState::Anonymous
        };

        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let shared = Arc::new(SessionShared {
            data: RwLock::new(SessionData {
                token,
                principal: None,
                state,
            }),
            store,
            events,
        });
        let client = client.with_auth_hook(shared.clone());

        Self { shared, client }
    }

    /// Client that authenticates with this session and reports `401`s to it.
    pub fn client(&self) -> ApiClient {
        self.client.clone()
    }

    /// Receive every subsequent state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.read().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn is_verifying(&self) -> bool {
        self.state() == SessionState::Verifying
    }

    pub fn current_principal(&self) -> Option<Principal> {
        let data = self.shared.read();
        match data.state {
            SessionState::Authenticated => data.principal.clone(),
            _ => None,
        }
    }

    /// Principal snapshot saved at the last login or verify, if any.
    pub fn stored_principal(&self) -> Option<Principal> {
        let json = self.shared.store.get(PRINCIPAL_KEY).ok().flatten()?;
        serde_json::from_str(&json).ok()
    }

    /// Authenticate with username and password.
    ///
    /// Rejected credentials come back as `ApiError::Unauthorized` and leave
    /// the session anonymous. Network and server failures are returned as-is
    /// for the caller to retry.
    pub async fn login(&self, username: &str, password: &str) -> Result<Principal, ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Validation {
                status: 400,
                message: "Username and password required".to_string(),
            });
        }

        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        {
            let mut data = self.shared.write();
            self.shared.transition(&mut data, SessionState::Verifying);
        }

        let request = ApiRequest::mutation(Method::POST, AUTH_LOGIN, Some(body));

        match self.client.send_json::<LoginResponse>(request).await {
            Ok(LoginResponse { token, user }) => {
                let mut data = self.shared.write();
                data.token = Some(token.clone());
                data.principal = Some(user.clone());
                self.shared.transition(&mut data, SessionState::Authenticated);
                self.shared.persist(&token, &user);
                info!(username = %user.username, "Login successful");
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                let mut data = self.shared.write();
                self.shared.clear(&mut data, false);
                Err(e)
            }
        }
    }

    /// Re-check the stored token with the server.
    ///
    /// Any failure clears the session and returns `false`.
    pub async fn verify(&self) -> bool {
        self.revalidate().await.is_ok()
    }

    /// Like [`verify`](Self::verify) but keeps the failure reason, so callers
    /// can tell "signed out" from "server unreachable".
    pub async fn revalidate(&self) -> Result<Principal, ApiError> {
        let token = {
            let mut data = self.shared.write();
            match data.token.clone() {
                Some(token) => token,
                None => {
                    self.shared.clear(&mut data, false);
                    return Err(ApiError::Unauthorized("No session token".to_string()));
                }
            }
        };

        let result = self
            .client
            .send_json::<VerifyResponse>(ApiRequest::get(AUTH_VERIFY))
            .await;

        let mut data = self.shared.write();
        if data.token.as_deref() != Some(token.as_str()) {
            // Cleared by a 401, logged out, or logged in again meanwhile
            return Err(match result {
                Err(e) => e,
                Ok(_) => ApiError::Unauthorized("Session changed during verification".to_string()),
            });
        }

        match result {
            Ok(VerifyResponse { user }) => {
                data.principal = Some(user.clone());
                self.shared.transition(&mut data, SessionState::Authenticated);
                self.shared.persist_principal(&user);
                debug!(username = %user.username, "Session verified");
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Session verification failed, signing out");
                let expired = matches!(e, ApiError::Unauthorized(_));
                self.shared.clear(&mut data, expired);
                Err(e)
            }
        }
    }

    /// Startup check: verify a restored token, or report `false` when there
    /// is nothing to verify.
    pub async fn resume(&self) -> bool {
        if self.shared.read().token.is_none() {
            return false;
        }
        self.verify().await
    }

    /// Sign out.
    ///
    /// Local state is cleared first; the server-side invalidation is best
    /// effort and its failure is only logged.
    pub async fn logout(&self) {
        let token = {
            let mut data = self.shared.write();
            let token = data.token.take();
            self.shared.clear(&mut data, false);
            token
        };
        info!("Logged out");

        let Some(token) = token else {
            return;
        };

        let request = ApiRequest::mutation(Method::POST, AUTH_LOGOUT, None)
            .with_header(header::AUTHORIZATION.as_str(), format!("Bearer {}", token));
        if let Err(e) = self.client.send(request).await {
            warn!(error = %e, "Server-side logout failed");
        }
    }

    /// Clear the session as if the server had rejected the token.
    pub fn expire(&self) {
        self.shared.on_unauthorized();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::api::ErrorKind;
    use crate::auth::store::MemoryStore;

    const LOGIN_OK: &str = r#"{"success":true,"data":{"token":"tok-1","user":{"id":1,"username":"admin","name":"Temple Admin"}}}"#;
    const VERIFY_OK: &str = r#"{"success":true,"data":{"user":{"id":1,"username":"admin","name":"Temple Admin"}}}"#;

    fn manager(backend: &Arc<MockBackend>, store: &Arc<MemoryStore>) -> SessionManager {
        SessionManager::new(ApiClient::new(backend.clone()), store.clone())
    }

    fn drain(rx: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state);
        }
        seen
    }

    async fn logged_in() -> (SessionManager, Arc<MockBackend>, Arc<MemoryStore>) {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        backend.respond("POST", AUTH_LOGIN, 200, LOGIN_OK);
        let session = manager(&backend, &store);
        session.login("admin", "correct").await.unwrap();
        (session, backend, store)
    }

    #[tokio::test]
    async fn test_login_success_transitions() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        backend.respond("POST", AUTH_LOGIN, 200, LOGIN_OK);
        let session = manager(&backend, &store);
        let mut events = session.subscribe();

        assert_eq!(session.state(), SessionState::Anonymous);
        let principal = session.login("admin", "correct").await.unwrap();

        assert_eq!(principal.display_name(), "Temple Admin");
        assert_eq!(
            drain(&mut events),
            vec![SessionState::Verifying, SessionState::Authenticated]
        );
        assert!(session.is_authenticated());
        assert_eq!(session.current_principal(), Some(principal));
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("tok-1"));
        assert!(store.get(PRINCIPAL_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_sends_credentials() {
        let (_session, backend, _store) = logged_in().await;
        let request = &backend.requests()[0];
        assert_eq!(
            request.body,
            Some(serde_json::json!({"username": "admin", "password": "correct"}))
        );
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_stays_anonymous() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        backend.respond("POST", AUTH_LOGIN, 401, r#"{"success":false,"message":"Invalid credentials"}"#);
        let session = manager(&backend, &store);

        let err = session.login("admin", "wrong").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(session.current_principal().is_none());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_network_failure_is_distinguishable() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        backend.set_offline(true);
        let session = manager(&backend, &store);

        let err = session.login("admin", "correct").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_server_error_is_distinguishable() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        backend.respond("POST", AUTH_LOGIN, 500, r#"{"success":false,"message":"Database unavailable"}"#);
        let session = manager(&backend, &store);

        let err = session.login("admin", "correct").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(session.current_principal().is_none());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_requires_both_fields() {
        let backend = Arc::new(MockBackend::new());
        let session = manager(&backend, &Arc::new(MemoryStore::new()));

        let err = session.login("admin", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_restored_token_starts_verifying() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "tok-old").unwrap();
        backend.respond("GET", AUTH_VERIFY, 200, VERIFY_OK);

        let session = manager(&backend, &store);
        assert!(session.is_verifying());
        assert!(session.current_principal().is_none());

        assert!(session.resume().await);
        assert!(session.is_authenticated());
        assert_eq!(session.current_principal().unwrap().username, "admin");
        assert_eq!(
            backend.requests()[0].header("authorization"),
            Some("Bearer tok-old")
        );
    }

    #[tokio::test]
    async fn test_verify_rejected_token_expires_session() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "tok-old").unwrap();
        store.set(PRINCIPAL_KEY, r#"{"id":1,"username":"admin"}"#).unwrap();
        backend.respond("GET", AUTH_VERIFY, 401, "");

        let session = manager(&backend, &store);
        let mut events = session.subscribe();

        assert!(!session.verify().await);
        assert_eq!(
            drain(&mut events),
            vec![SessionState::Expired, SessionState::Anonymous]
        );
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(PRINCIPAL_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_verify_network_failure_clears_and_reports_reason() {
        let (session, backend, store) = logged_in().await;
        backend.set_offline(true);

        let err = session.revalidate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!session.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_resume_without_token_skips_network() {
        let backend = Arc::new(MockBackend::new());
        let session = manager(&backend, &Arc::new(MemoryStore::new()));

        assert!(!session.resume().await);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_any_401_clears_session() {
        let (session, backend, store) = logged_in().await;
        backend.respond("GET", "gallery/admin", 401, r#"{"message":"jwt expired"}"#);

        let err = session.client().get_data("gallery/admin").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!session.is_authenticated());
        assert!(session.current_principal().is_none());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_offline_still_clears() {
        let (session, backend, store) = logged_in().await;
        backend.set_offline(true);

        session.logout().await;

        assert!(!session.is_authenticated());
        assert!(session.current_principal().is_none());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_invalidates_token_server_side() {
        let (session, backend, _store) = logged_in().await;
        backend.respond("POST", AUTH_LOGOUT, 200, r#"{"success":true}"#);

        session.logout().await;

        assert_eq!(backend.call_count("POST", AUTH_LOGOUT), 1);
        let request = backend
            .requests()
            .into_iter()
            .find(|r| r.path == AUTH_LOGOUT)
            .unwrap();
        assert_eq!(request.header("authorization"), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn test_logout_when_anonymous_sends_nothing() {
        let backend = Arc::new(MockBackend::new());
        let session = manager(&backend, &Arc::new(MemoryStore::new()));

        session.logout().await;
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stored_principal_snapshot() {
        let (session, _backend, _store) = logged_in().await;
        assert_eq!(session.stored_principal().unwrap().username, "admin");

        session.expire();
        assert!(session.current_principal().is_none());
        assert!(session.stored_principal().is_none());
    }
}
