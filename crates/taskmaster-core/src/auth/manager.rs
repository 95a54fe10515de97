use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    CredentialStore, HttpRefreshEndpoint, Navigation, RefreshCoordinator, RefreshEndpoint,
    SessionEvent, SessionGuard,
};
use crate::api::{self, ApiError, AuthenticatedTransport, HttpTransport, ReqwestTransport, TaskmasterApi};
use crate::config::Config;
use crate::models::UserProfile;
use crate::storage::{self, KeyValueStore};

/// Owns one user's session and everything that acts on it.
///
/// Pass a `SessionManager` (or the handles it hands out) to the HTTP layer
/// and navigation code explicitly; there is no global session.
pub struct SessionManager {
    raw: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    http: Arc<AuthenticatedTransport>,
    api: TaskmasterApi,
    guard: SessionGuard,
}

impl SessionManager {
    /// Build a manager on `transport`, refreshing through the server's
    /// refresh endpoint
    pub fn new(transport: Arc<dyn HttpTransport>, storage: Arc<dyn KeyValueStore>) -> Self {
        let endpoint = Arc::new(HttpRefreshEndpoint::new(Arc::clone(&transport)));
        Self::with_refresh_endpoint(transport, storage, endpoint)
    }

    pub fn with_refresh_endpoint(
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn KeyValueStore>,
        endpoint: Arc<dyn RefreshEndpoint>,
    ) -> Self {
        let store = Arc::new(CredentialStore::new(storage));
        let refresher = Arc::new(RefreshCoordinator::new(Arc::clone(&store), endpoint));
        let http = Arc::new(AuthenticatedTransport::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&refresher),
        ));
        let api = TaskmasterApi::new(http.clone(), Arc::clone(&store));

        Self {
            raw: transport,
            store,
            refresher,
            http,
            api,
            guard: SessionGuard::default(),
        }
    }

    /// Build the production stack described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
        let data_dir = config.data_dir()?;
        debug!(backend = ?config.storage, data_dir = %data_dir.display(), "Opening token storage");
        let storage = storage::open(config.storage, &data_dir);
        Ok(Self::new(Arc::new(transport), storage))
    }

    pub fn with_guard(mut self, guard: SessionGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Startup: restore a persisted session and, if there is one, fetch
    /// the user's profile. Returns whether a session is active afterwards.
    pub async fn initialize(&self) -> bool {
        if self.store.load() {
            if let Err(e) = self.fetch_user().await {
                warn!(error = %e, "Failed to fetch user after loading session");
            }
        }
        self.store.is_authenticated()
    }

    /// Log in with email and password, replacing any current session
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let response = api::authenticate(self.raw.as_ref(), email, password).await?;
        info!(user = %response.user.username, "Login successful");
        self.store
            .set_session(Some(response.user.clone()), response.tokens);
        Ok(response.user)
    }

    /// Fetch the profile of the logged-in user.
    ///
    /// `Ok(None)` without a network call when there is no session. A final
    /// 401 ends the session.
    pub async fn fetch_user(&self) -> Result<Option<UserProfile>, ApiError> {
        if !self.store.is_authenticated() {
            return Ok(None);
        }

        match self.api.current_user().await {
            Ok(user) => {
                self.store.set_user(user.clone());
                Ok(Some(user))
            }
            Err(ApiError::Unauthorized) => {
                warn!("Session rejected while fetching user, logging out");
                if self.store.is_authenticated() {
                    self.store.clear();
                }
                Err(ApiError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    pub fn logout(&self) {
        self.store.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.current_user()
    }

    /// The authenticated request function: same signature as the raw
    /// transport, with tokens attached and renewed transparently
    pub fn client(&self) -> Arc<dyn HttpTransport> {
        self.http.clone()
    }

    pub fn api(&self) -> &TaskmasterApi {
        &self.api
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.refresher
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    /// Check navigation to `destination` against the current session
    pub fn check_navigation(&self, destination: &str) -> Navigation {
        self.guard.check(destination, &self.store)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe()
    }
}
