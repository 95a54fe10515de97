//! Single-flight access token renewal.
//!
//! However many requests discover an expired access token at once, only one
//! call reaches the refresh endpoint. The first caller spawns the refresh
//! operation; everyone arriving while it is in flight awaits a clone of the
//! same shared future and so observes the same outcome. The spawned task
//! applies and retires itself whether or not anyone is still waiting.
//! The owner/waiter decision is made under a synchronous lock that is never
//! held across an await point.
//!
//! States: idle, refreshing, and (on failure) a logout transition that
//! clears the session before returning to idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::CredentialStore;
use crate::api::{ApiRequest, HttpTransport};

/// Path of the token refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "auth/token/refresh/";

/// Why a refresh produced no access token. Cloneable so one outcome can be
/// handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected (status {status})")]
    Rejected { status: u16 },

    #[error("Network error during token refresh: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Session ended while the token was being refreshed")]
    SessionEnded,
}

pub type RefreshOutcome = Result<String, RefreshError>;

/// Tokens returned by the refresh endpoint. `refresh` is only present when
/// the server rotates refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}

/// The server's `POST auth/token/refresh/` endpoint, called on the raw
/// transport so its own 401 can never re-enter the refresh path
pub struct HttpRefreshEndpoint {
    transport: Arc<dyn HttpTransport>,
    path: String,
}

impl HttpRefreshEndpoint {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_path(transport, REFRESH_PATH)
    }

    pub fn with_path(transport: Arc<dyn HttpTransport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let request = ApiRequest::post(self.path.clone())
            .json(&serde_json::json!({ "refresh": refresh_token }))
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status.as_u16(),
            });
        }

        response
            .json()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    operation: SharedRefresh,
}

type ActiveSlot = Arc<Mutex<Option<InFlight>>>;

fn lock_slot(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

enum Trigger<'a> {
    Explicit,
    /// A request carrying this access token was rejected
    Rejected(Option<&'a str>),
}

enum Attach {
    Ready(RefreshOutcome),
    Wait(SharedRefresh),
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    endpoint: Arc<dyn RefreshEndpoint>,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, endpoint: Arc<dyn RefreshEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Obtain a new access token, joining the in-flight refresh if there is one.
    ///
    /// Without a refresh token this fails immediately, without a network
    /// call and without touching the session. A failed refresh clears the
    /// session and is not retried.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.attach(Trigger::Explicit) {
            Attach::Ready(outcome) => outcome,
            Attach::Wait(operation) => operation.await,
        }
    }

    /// Like [`refresh`](Self::refresh), for a request that was rejected
    /// while carrying `sent_token` (`None` if it went out without one). If
    /// the store now holds a different access token, a refresh or login
    /// finished after that request was sent and the current token is
    /// returned without another network call.
    pub async fn refresh_stale(&self, sent_token: Option<&str>) -> RefreshOutcome {
        match self.attach(Trigger::Rejected(sent_token)) {
            Attach::Ready(outcome) => outcome,
            Attach::Wait(operation) => operation.await,
        }
    }

    /// Whether a refresh operation is currently in flight
    pub fn is_refreshing(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    /// Decide owner vs waiter. Runs entirely under the slot lock and never
    /// suspends, so two near-simultaneous callers cannot both start a refresh.
    fn attach(&self, trigger: Trigger<'_>) -> Attach {
        let mut active = lock_slot(&self.active);

        if let Some(in_flight) = active.as_ref() {
            debug!(operation = in_flight.id, "Joining in-flight token refresh");
            return Attach::Wait(in_flight.operation.clone());
        }

        if let Trigger::Rejected(sent) = trigger {
            if let Some(current) = self.store.access_token() {
                if Some(current.as_str()) != sent {
                    debug!("Access token already renewed since request was sent");
                    return Attach::Ready(Ok(current));
                }
            }
        }

        let Some(refresh_token) = self.store.refresh_token() else {
            debug!("No refresh token, not attempting refresh");
            return Attach::Ready(Err(RefreshError::NoRefreshToken));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Spawned so the refresh completes and retires even if every caller is dropped
        let task = tokio::spawn(run_refresh(
            id,
            refresh_token,
            Arc::clone(&self.store),
            Arc::clone(&self.endpoint),
            Arc::clone(&self.active),
        ));
        let operation = async move {
            task.await.unwrap_or_else(|e| {
                error!(operation = id, error = %e, "Token refresh task failed");
                Err(RefreshError::Network(format!("refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        *active = Some(InFlight {
            id,
            operation: operation.clone(),
        });
        Attach::Wait(operation)
    }
}

async fn run_refresh(
    id: u64,
    refresh_token: String,
    store: Arc<CredentialStore>,
    endpoint: Arc<dyn RefreshEndpoint>,
    active: ActiveSlot,
) -> RefreshOutcome {
    info!(operation = id, "Access token expired, refreshing");

    let outcome = match endpoint.refresh(&refresh_token).await {
        Ok(tokens) => {
            if store.apply_refresh(&refresh_token, &tokens.access, tokens.refresh.as_deref()) {
                info!(operation = id, rotated = tokens.refresh.is_some(), "Access token refreshed");
                Ok(tokens.access)
            } else {
                warn!(operation = id, "Session changed during refresh, discarding new token");
                Err(RefreshError::SessionEnded)
            }
        }
        Err(e) => {
            error!(operation = id, error = %e, "Failed to refresh token, logging out");
            store.clear_if_current(&refresh_token);
            Err(e)
        }
    };

    // Retire before any waiter sees the outcome, so late callers start fresh
    let mut slot = lock_slot(&active);
    if slot.as_ref().map(|f| f.id) == Some(id) {
        *slot = None;
    }

    outcome
}
