//! Process-wide session state with durable persistence.
//!
//! `CredentialStore` is the only writer of [`SessionState`]. Reads always go
//! through its getters, so callers observe a refreshed token as soon as it
//! is stored. Persistence is best effort: a failed write is logged and the
//! in-memory state stays authoritative for the current process.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::UserProfile;
use crate::storage::{KeyValueStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Access/refresh token pair issued at login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "access")]
    pub access_token: String,
    #[serde(rename = "refresh")]
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens are bearer secrets; keep them out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Both tokens, when both are present
    pub fn credential(&self) -> Option<Credential> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credential::new(access, refresh)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user.as_ref().map(|u| &u.username))
            .finish()
    }
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    TokenRefreshed,
    /// The session was cleared; front ends redirect to the login entry point
    LoggedOut,
}

pub struct CredentialStore {
    state: RwLock<SessionState>,
    storage: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl CredentialStore {
    /// Create an empty store backed by `storage`. Call [`load`](Self::load)
    /// to pick up a persisted session.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(SessionState::default()),
            storage,
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key, error = %e, "Failed to persist token");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            warn!(key, error = %e, "Failed to remove persisted token");
        }
    }

    fn notify(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Load a persisted session. Returns whether one was found.
    ///
    /// Both tokens must be present; a lone token is discarded so storage
    /// never holds half a session. No network access.
    pub fn load(&self) -> bool {
        let read = |key: &str| match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted token");
                None
            }
        };
        let access = read(ACCESS_TOKEN_KEY);
        let refresh = read(REFRESH_TOKEN_KEY);

        match (access, refresh) {
            (Some(access), Some(refresh)) => {
                let mut state = self.write();
                state.access_token = Some(access);
                state.refresh_token = Some(refresh);
                debug!("Persisted session loaded");
                true
            }
            (None, None) => {
                debug!("No persisted session");
                false
            }
            _ => {
                warn!("Discarding incomplete persisted session");
                self.forget(ACCESS_TOKEN_KEY);
                self.forget(REFRESH_TOKEN_KEY);
                false
            }
        }
    }

    /// Replace the user and both tokens, persisting the tokens
    pub fn set_session(&self, user: Option<UserProfile>, credential: Credential) {
        {
            let mut state = self.write();
            state.user = user;
            state.access_token = Some(credential.access_token.clone());
            state.refresh_token = Some(credential.refresh_token.clone());
        }
        self.persist(ACCESS_TOKEN_KEY, &credential.access_token);
        self.persist(REFRESH_TOKEN_KEY, &credential.refresh_token);
        info!("Session established");
        self.notify(SessionEvent::LoggedIn);
    }

    /// Replace only the access token, leaving the refresh token and user untouched
    pub fn update_access_token(&self, access_token: &str) {
        self.write().access_token = Some(access_token.to_string());
        self.persist(ACCESS_TOKEN_KEY, access_token);
        self.notify(SessionEvent::TokenRefreshed);
    }

    /// Store the result of a refresh made with `used_refresh_token`.
    ///
    /// Returns `false`, changing nothing, when the session moved on while
    /// the refresh was in flight (logout, or a new login). A rotated
    /// refresh token replaces the stored one.
    pub fn apply_refresh(
        &self,
        used_refresh_token: &str,
        access_token: &str,
        rotated_refresh_token: Option<&str>,
    ) -> bool {
        {
            let mut state = self.write();
            if state.refresh_token.as_deref() != Some(used_refresh_token) {
                return false;
            }
            state.access_token = Some(access_token.to_string());
            if let Some(rotated) = rotated_refresh_token {
                state.refresh_token = Some(rotated.to_string());
            }
        }
        self.persist(ACCESS_TOKEN_KEY, access_token);
        if let Some(rotated) = rotated_refresh_token {
            self.persist(REFRESH_TOKEN_KEY, rotated);
        }
        self.notify(SessionEvent::TokenRefreshed);
        true
    }

    pub fn set_user(&self, user: UserProfile) {
        self.write().user = Some(user);
    }

    /// Empty the session, remove persisted tokens and signal logout
    pub fn clear(&self) {
        *self.write() = SessionState::default();
        self.forget(ACCESS_TOKEN_KEY);
        self.forget(REFRESH_TOKEN_KEY);
        info!("Session cleared");
        self.notify(SessionEvent::LoggedOut);
    }

    /// Clear the session only if it still uses `refresh_token`.
    /// Returns whether the session was cleared.
    pub fn clear_if_current(&self, refresh_token: &str) -> bool {
        {
            let mut state = self.write();
            if state.refresh_token.as_deref() != Some(refresh_token) {
                return false;
            }
            *state = SessionState::default();
        }
        self.forget(ACCESS_TOKEN_KEY);
        self.forget(REFRESH_TOKEN_KEY);
        info!("Session cleared after failed refresh");
        self.notify(SessionEvent::LoggedOut);
        true
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use anyhow::Result;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("disk unavailable"))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk unavailable"))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk unavailable"))
        }
    }

    fn user() -> UserProfile {
        UserProfile {
            id: 1,
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            avatar: None,
        }
    }

    fn memory_store() -> (Arc<MemoryStore>, CredentialStore) {
        let storage = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(storage.clone());
        (storage, store)
    }

    #[test]
    fn test_new_store_is_empty() {
        let (_, store) = memory_store();
        assert!(!store.is_authenticated());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_set_session_persists_both_tokens() {
        let (storage, store) = memory_store();
        store.set_session(Some(user()), Credential::new("A1", "R1"));

        assert!(store.is_authenticated());
        assert_eq!(store.current_user(), Some(user()));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A1"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
    }

    #[test]
    fn test_load_restores_persisted_session() {
        let (storage, store) = memory_store();
        store.set_session(Some(user()), Credential::new("A1", "R1"));

        let restarted = CredentialStore::new(storage);
        assert!(restarted.load());
        assert!(restarted.load());
        assert_eq!(
            restarted.snapshot().credential(),
            Some(Credential::new("A1", "R1"))
        );
        // The profile is not persisted; it is fetched again after startup
        assert_eq!(restarted.current_user(), None);
    }

    #[test]
    fn test_load_discards_lone_token() {
        let (storage, store) = memory_store();
        storage.set(ACCESS_TOKEN_KEY, "A1").unwrap();

        assert!(!store.load());
        assert!(!store.is_authenticated());
        assert!(!storage.contains(ACCESS_TOKEN_KEY));
    }

    #[test]
    fn test_update_access_token_keeps_refresh_and_user() {
        let (storage, store) = memory_store();
        store.set_session(Some(user()), Credential::new("A1", "R1"));
        store.update_access_token("A2");

        assert_eq!(store.access_token().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert_eq!(store.current_user(), Some(user()));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A2"));
    }

    #[test]
    fn test_apply_refresh_rotates_refresh_token() {
        let (storage, store) = memory_store();
        store.set_session(None, Credential::new("A1", "R1"));

        assert!(store.apply_refresh("R1", "A2", Some("R2")));
        assert_eq!(store.snapshot().credential(), Some(Credential::new("A2", "R2")));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    }

    #[test]
    fn test_apply_refresh_after_logout_is_ignored() {
        let (storage, store) = memory_store();
        store.set_session(None, Credential::new("A1", "R1"));
        store.clear();

        assert!(!store.apply_refresh("R1", "A2", None));
        assert!(!store.is_authenticated());
        assert!(!storage.contains(ACCESS_TOKEN_KEY));
    }

    #[test]
    fn test_clear_removes_everything() {
        let (storage, store) = memory_store();
        store.set_session(Some(user()), Credential::new("A1", "R1"));
        store.clear();

        assert!(!store.is_authenticated());
        assert!(store.snapshot().is_empty());
        assert!(!storage.contains(ACCESS_TOKEN_KEY));
        assert!(!storage.contains(REFRESH_TOKEN_KEY));
    }

    #[test]
    fn test_clear_if_current() {
        let (_, store) = memory_store();
        store.set_session(None, Credential::new("A2", "R2"));

        assert!(!store.clear_if_current("R1"));
        assert!(store.is_authenticated());
        assert!(store.clear_if_current("R2"));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_persistence_failures_are_tolerated() {
        let store = CredentialStore::new(Arc::new(BrokenStore));
        assert!(!store.load());

        store.set_session(Some(user()), Credential::new("A1", "R1"));
        assert_eq!(store.access_token().as_deref(), Some("A1"));

        store.update_access_token("A2");
        assert_eq!(store.access_token().as_deref(), Some("A2"));

        store.clear();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_events_are_broadcast() {
        let (_, store) = memory_store();
        let mut events = store.subscribe();

        store.set_session(None, Credential::new("A1", "R1"));
        store.update_access_token("A2");
        store.clear();

        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedIn);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::TokenRefreshed);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let credential = Credential::new("secret-access", "secret-refresh");
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("secret"));
    }
}
