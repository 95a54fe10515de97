use super::CredentialStore;

/// Where unauthenticated users are sent
pub const LOGIN_ROUTE: &str = "/login";

/// Routes reachable without a session
pub const PUBLIC_ROUTES: [&str; 3] = ["/login", "/register", "/"];

/// Result of a navigation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Gates navigation to protected views on the presence of a session
#[derive(Debug, Clone)]
pub struct SessionGuard {
    public_routes: Vec<String>,
    login_route: String,
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new(PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(), LOGIN_ROUTE)
    }
}

impl SessionGuard {
    pub fn new(public_routes: Vec<String>, login_route: impl Into<String>) -> Self {
        Self {
            public_routes,
            login_route: login_route.into(),
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Whether `destination` is on the public allow-list. Query strings and
    /// fragments are ignored; paths are otherwise matched exactly.
    pub fn is_public(&self, destination: &str) -> bool {
        let path = route_path(destination);
        self.public_routes.iter().any(|r| r == path)
    }

    /// Decide whether navigation to `destination` may proceed
    pub fn check(&self, destination: &str, store: &CredentialStore) -> Navigation {
        self.decide(destination, store.is_authenticated())
    }

    pub fn decide(&self, destination: &str, authenticated: bool) -> Navigation {
        if authenticated || self.is_public(destination) {
            Navigation::Proceed
        } else {
            tracing::debug!(destination, "Not logged in, redirecting to login");
            Navigation::Redirect(self.login_route.clone())
        }
    }
}

fn route_path(destination: &str) -> &str {
    let end = destination.find(['?', '#']).unwrap_or(destination.len());
    &destination[..end]
}
