//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `CredentialStore`: Session state (tokens + profile) with persistence
//! - `RefreshCoordinator`: Single-flight access token renewal
//! - `SessionGuard`: Navigation gate for protected views
//! - `SessionManager`: Owns and wires the pieces above
//!
//! Access tokens are short-lived; an expired one is renewed with the
//! refresh token the first time a request comes back 401.

pub mod guard;
pub mod manager;
pub mod refresh;
pub mod store;

pub use guard::{Navigation, SessionGuard, LOGIN_ROUTE, PUBLIC_ROUTES};
pub use manager::SessionManager;
pub use refresh::{
    HttpRefreshEndpoint, RefreshCoordinator, RefreshEndpoint, RefreshError, RefreshOutcome,
    RefreshedTokens, REFRESH_PATH,
};
pub use store::{Credential, CredentialStore, SessionEvent, SessionState};
