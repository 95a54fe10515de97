//! API client for the Taskmaster REST API.
//!
//! `TaskmasterApi` issues typed calls for tasks, projects and invitations
//! through the authenticated transport, so token attachment and renewal are
//! invisible here. Login is the one call made on the raw transport.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport};
use crate::auth::{Credential, CredentialStore};
use crate::models::{
    Invitation, Project, ProjectDraft, Task, TaskDraft, TaskFilter, TaskPage, TaskStatus,
    UserProfile,
};

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_PATH: &str = "auth/login/";
pub const CURRENT_USER_PATH: &str = "auth/me";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Body of a successful `auth/login/`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub tokens: Credential,
}

/// List endpoints answer either a bare array or a paginated envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Plain(items) => items,
            Listing::Paged { results } => results,
        }
    }
}

/// Exchange email and password for a session. Sent on the raw transport:
/// a rejected login must not trigger a token refresh.
pub async fn authenticate(
    transport: &dyn HttpTransport,
    email: &str,
    password: &str,
) -> Result<LoginResponse, ApiError> {
    let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
    let response = transport.send(request).await?;
    let response = check_response(response)?;
    decode(&response)
}

fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_status(response.status, &response.body))
    }
}

fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
    response
        .json()
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
}

/// Typed access to the Taskmaster API.
/// Clone is cheap - the transport and store are shared.
#[derive(Clone)]
pub struct TaskmasterApi {
    http: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    initial_backoff: Duration,
}

impl TaskmasterApi {
    /// `http` is normally the authenticated transport
    pub fn new(http: Arc<dyn HttpTransport>, store: Arc<CredentialStore>) -> Self {
        Self {
            http,
            store,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Override the first rate-limit backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Every call here needs a session; fail before touching the network
    fn require_session(&self) -> Result<(), ApiError> {
        if self.store.is_authenticated() {
            Ok(())
        } else {
            Err(ApiError::NoSession)
        }
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.require_session()?;

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.http.send(request.clone()).await?;
            if response.status.as_u16() != 429 {
                return check_response(response);
            }

            // Rate limited
            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2; // Exponential backoff
        }
    }

    async fn get<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        decode(&response)
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        request: ApiRequest,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(request.json(body)?).await?;
        decode(&response)
    }

    /// For endpoints whose body we don't need (204s, `{"detail": ...}` acks)
    async fn send_ignoring_body(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.execute(request).await.map(|_| ())
    }

    // ===== Account =====

    /// Fetch the profile of the logged-in user
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get(ApiRequest::get(CURRENT_USER_PATH)).await
    }

    // ===== Tasks =====

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage, ApiError> {
        let page: TaskPage = self
            .get(ApiRequest::get("tasks/").query(filter.query_pairs()))
            .await?;
        debug!(count = page.count, returned = page.results.len(), "Tasks fetched");
        Ok(page)
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, ApiError> {
        self.get(ApiRequest::get(format!("tasks/{}/", id))).await
    }

    pub async fn create_task(&self, draft: &TaskDraft) -> Result<Task, ApiError> {
        self.send_json(ApiRequest::post("tasks/"), draft).await
    }

    pub async fn update_task(&self, id: i64, draft: &TaskDraft) -> Result<Task, ApiError> {
        self.send_json(ApiRequest::put(format!("tasks/{}/", id)), draft)
            .await
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), ApiError> {
        self.send_ignoring_body(ApiRequest::delete(format!("tasks/{}/", id)))
            .await
    }

    /// Persist the order of a board column after a drag-and-drop
    pub async fn update_task_order(
        &self,
        status: TaskStatus,
        ordered_ids: &[i64],
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "status": status,
            "ordered_ids": ordered_ids,
        });
        self.send_ignoring_body(ApiRequest::post("tasks/update-order/").json(&body)?)
            .await
    }

    // ===== Projects =====

    pub async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let listing: Listing<Project> = self.get(ApiRequest::get("projects/")).await?;
        Ok(listing.into_vec())
    }

    pub async fn get_project(&self, id: i64) -> Result<Project, ApiError> {
        self.get(ApiRequest::get(format!("projects/{}/", id))).await
    }

    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<Project, ApiError> {
        self.send_json(ApiRequest::post("projects/"), draft).await
    }

    pub async fn delete_project(&self, id: i64) -> Result<(), ApiError> {
        self.send_ignoring_body(ApiRequest::delete(format!("projects/{}/", id)))
            .await
    }

    pub async fn project_members(&self, project_id: i64) -> Result<Vec<UserProfile>, ApiError> {
        let listing: Listing<UserProfile> = self
            .get(ApiRequest::get(format!("projects/{}/members/", project_id)))
            .await?;
        Ok(listing.into_vec())
    }

    pub async fn remove_member(&self, project_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.send_ignoring_body(ApiRequest::delete(format!(
            "projects/{}/members/{}/",
            project_id, user_id
        )))
        .await
    }

    pub async fn leave_project(&self, project_id: i64) -> Result<(), ApiError> {
        self.send_ignoring_body(ApiRequest::post(format!("projects/{}/leave/", project_id)))
            .await
    }

    // ===== Invitations =====

    pub async fn invite(&self, project_id: i64, email: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(format!("projects/{}/invitations/", project_id))
            .json(&serde_json::json!({ "email": email }))?;
        self.send_ignoring_body(request).await
    }

    pub async fn pending_invitations(&self) -> Result<Vec<Invitation>, ApiError> {
        let listing: Listing<Invitation> =
            self.get(ApiRequest::get("invitations/pending/")).await?;
        Ok(listing.into_vec())
    }

    pub async fn accept_invitation(&self, token: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("invitations/accept/")
            .json(&serde_json::json!({ "token": token }))?;
        self.send_ignoring_body(request).await
    }

    pub async fn decline_invitation(&self, token: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("invitations/decline/")
            .json(&serde_json::json!({ "token": token }))?;
        self.send_ignoring_body(request).await
    }
}
