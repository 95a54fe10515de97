//! Transparent credential attachment and renewal.
//!
//! [`AuthenticatedTransport`] has the same `send` signature as the transport
//! it wraps. It reads the current access token from the store on every call,
//! and when a request comes back 401 it waits for the shared refresh and
//! replays the request exactly once with the new token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{ApiRequest, ApiResponse, HttpTransport, TransportError};
use crate::auth::{CredentialStore, RefreshCoordinator, REFRESH_PATH};

pub struct AuthenticatedTransport {
    inner: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    refresh_path: String,
}

impl AuthenticatedTransport {
    pub fn new(
        inner: Arc<dyn HttpTransport>,
        store: Arc<CredentialStore>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            inner,
            store,
            refresher,
            refresh_path: REFRESH_PATH.to_string(),
        }
    }

    /// Use a non-default refresh endpoint path
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }
}

#[async_trait]
impl HttpTransport for AuthenticatedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        // Read the token fresh on every call; it may have been refreshed since
        let sent_token = self.store.access_token();
        let outgoing = match sent_token {
            Some(ref token) => request.clone().with_bearer(token)?,
            None => request.clone(),
        };

        let response = self.inner.send(outgoing).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if request.targets(&self.refresh_path) {
            debug!("Refresh endpoint returned 401, not refreshing");
            return Ok(response);
        }

        debug!(path = %request.path, "Request unauthorized, awaiting token refresh");
        let outcome = self.refresher.refresh_stale(sent_token.as_deref()).await;

        match outcome {
            Ok(new_token) => {
                debug!(path = %request.path, "Retrying original request with new token");
                // A second 401 here is final
                self.inner.send(request.with_bearer(&new_token)?).await
            }
            Err(e) => {
                warn!(path = %request.path, error = %e, "Could not renew session");
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, RefreshEndpoint, RefreshError, RefreshedTokens};
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers 401 to any request not carrying `valid_token`, and records
    /// the bearer token of every request it sees
    struct TokenCheckingServer {
        valid_token: String,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl TokenCheckingServer {
        fn new(valid_token: &str) -> Arc<Self> {
            Arc::new(Self {
                valid_token: valid_token.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for TokenCheckingServer {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let token = request.bearer_token().map(str::to_string);
            self.seen
                .lock()
                .unwrap()
                .push((request.path.clone(), token.clone()));
            if token.as_deref() == Some(self.valid_token.as_str()) {
                Ok(ApiResponse::new(StatusCode::OK, r#"{"ok": true}"#))
            } else {
                Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"detail": "expired"}"#))
            }
        }
    }

    struct CountingEndpoint {
        calls: AtomicUsize,
        result: Result<RefreshedTokens, RefreshError>,
    }

    #[async_trait]
    impl RefreshEndpoint for CountingEndpoint {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Harness {
        server: Arc<TokenCheckingServer>,
        endpoint: Arc<CountingEndpoint>,
        store: Arc<CredentialStore>,
        transport: AuthenticatedTransport,
    }

    fn harness(valid_token: &str, refresh_result: Result<RefreshedTokens, RefreshError>) -> Harness {
        let server = TokenCheckingServer::new(valid_token);
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            result: refresh_result,
        });
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), endpoint.clone()));
        let transport = AuthenticatedTransport::new(server.clone(), store.clone(), refresher);
        Harness {
            server,
            endpoint,
            store,
            transport,
        }
    }

    fn new_access(token: &str) -> Result<RefreshedTokens, RefreshError> {
        Ok(RefreshedTokens {
            access: token.to_string(),
            refresh: None,
        })
    }

    #[tokio::test]
    async fn test_attaches_current_token() {
        let h = harness("T1", new_access("unused"));
        h.store.set_session(None, Credential::new("T1", "R1"));

        let response = h.transport.send(ApiRequest::get("tasks/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.server.seen(), vec![("tasks/".to_string(), Some("T1".to_string()))]);
        assert_eq!(h.endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_unmodified() {
        let h = harness("T1", new_access("unused"));

        let response = h.transport.send(ApiRequest::get("auth/me")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.server.seen(), vec![("auth/me".to_string(), None)]);
        // No refresh token: no refresh attempt
        assert_eq!(h.endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_retried() {
        let h = harness("T2", new_access("T2"));
        h.store.set_session(None, Credential::new("T1", "R1"));

        let response = h.transport.send(ApiRequest::get("tasks/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            h.server.seen(),
            vec![
                ("tasks/".to_string(), Some("T1".to_string())),
                ("tasks/".to_string(), Some("T2".to_string())),
            ]
        );
        assert_eq!(h.store.access_token().as_deref(), Some("T2"));
        assert_eq!(h.endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_during_tokenless_request_is_not_refreshed() {
        /// Rejects the first request; by the time it answers, a login has landed
        struct LoginRace {
            store: Arc<CredentialStore>,
        }

        #[async_trait]
        impl HttpTransport for LoginRace {
            async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
                match request.bearer_token() {
                    None => {
                        self.store.set_session(None, Credential::new("A1", "R1"));
                        Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, "{}"))
                    }
                    Some(_) => Ok(ApiResponse::new(StatusCode::OK, "{}")),
                }
            }
        }

        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            result: new_access("T9"),
        });
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), endpoint.clone()));
        let server = Arc::new(LoginRace {
            store: store.clone(),
        });
        let transport = AuthenticatedTransport::new(server, store.clone(), refresher);

        let response = transport.send(ApiRequest::get("tasks/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.access_token().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_final() {
        // Server never accepts the refreshed token
        let h = harness("never", new_access("T2"));
        h.store.set_session(None, Credential::new("T1", "R1"));

        let response = h.transport.send(ApiRequest::get("tasks/")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.server.seen().len(), 2);
        assert_eq!(h.endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_failure() {
        let h = harness("T2", Err(RefreshError::Rejected { status: 401 }));
        h.store.set_session(None, Credential::new("T1", "R1"));

        let response = h.transport.send(ApiRequest::get("tasks/")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body, r#"{"detail": "expired"}"#);
        assert_eq!(h.server.seen().len(), 1);
        assert!(!h.store.is_authenticated());
        assert!(h.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_endpoint_401_never_refreshes() {
        let h = harness("T2", new_access("T2"));
        h.store.set_session(None, Credential::new("T1", "R1"));

        let response = h
            .transport
            .send(ApiRequest::post("/auth/token/refresh/"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.endpoint.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.server.seen().len(), 1);
        assert!(h.store.is_authenticated());
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        struct NotFound;

        #[async_trait]
        impl HttpTransport for NotFound {
            async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
                Ok(ApiResponse::new(StatusCode::NOT_FOUND, "{}"))
            }
        }

        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        store.set_session(None, Credential::new("T1", "R1"));
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            result: new_access("T2"),
        });
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), endpoint.clone()));
        let transport = AuthenticatedTransport::new(Arc::new(NotFound), store, refresher);

        let response = transport.send(ApiRequest::get("tasks/99/")).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_network_errors_propagate() {
        struct Offline;

        #[async_trait]
        impl HttpTransport for Offline {
            async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
                Err(TransportError::Network("connection refused".to_string()))
            }
        }

        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        store.set_session(None, Credential::new("T1", "R1"));
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            result: new_access("T2"),
        });
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), endpoint));
        let transport = AuthenticatedTransport::new(Arc::new(Offline), store.clone(), refresher);

        let result = transport.send(ApiRequest::get("tasks/")).await;
        assert!(matches!(result, Err(TransportError::Network(_))));
        assert!(store.is_authenticated());
    }
}
