//! End-to-end session behaviour over the real reqwest transport against a
//! local mock server.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use taskmaster_core::api::{ApiError, ReqwestTransport};
use taskmaster_core::auth::{Credential, Navigation, SessionEvent, SessionManager};
use taskmaster_core::models::TaskFilter;
use taskmaster_core::storage::{FileStore, KeyValueStore, MemoryStore, REFRESH_TOKEN_KEY, TOKEN_FILE};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn empty_page() -> serde_json::Value {
    json!({"count": 0, "next": null, "previous": null, "results": []})
}

fn user_json() -> serde_json::Value {
    json!({"id": 3, "username": "grace", "email": "grace@example.com", "avatar": null})
}

fn manager(server: &MockServer, storage: Arc<dyn KeyValueStore>) -> SessionManager {
    let transport = ReqwestTransport::new(&format!("{}/api/", server.uri()), Duration::from_secs(5))
        .unwrap();
    SessionManager::new(Arc::new(transport), storage)
}

async fn mount_expired_token_tasks(server: &MockServer, expired: u64, renewed: u64) {
    Mock::given(method("GET"))
        .and(path("/api/tasks/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid"
        })))
        .expect(expired)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_page()))
        .expect(renewed)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_expiry_triggers_one_refresh() {
    let server = MockServer::start().await;
    mount_expired_token_tasks(&server, 10, 10).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "R1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "T2"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager(&server, Arc::new(MemoryStore::new()));
    manager.store().set_session(None, Credential::new("T1", "R1"));

    let filter = TaskFilter::default();
    let results = join_all((0..10).map(|_| manager.api().list_tasks(&filter))).await;

    for result in results {
        assert_eq!(result.unwrap().count, 0);
    }
    assert_eq!(manager.store().access_token().as_deref(), Some("T2"));
    assert_eq!(manager.store().refresh_token().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_rejected_refresh_ends_session_everywhere() {
    let server = MockServer::start().await;
    mount_expired_token_tasks(&server, 1, 0).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is invalid or expired",
            "code": "token_not_valid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join(TOKEN_FILE);
    let manager = manager(&server, Arc::new(FileStore::new(token_file.clone())));
    manager.store().set_session(None, Credential::new("T1", "R1"));
    assert!(token_file.exists());
    let mut events = manager.subscribe();

    let err = manager
        .api()
        .list_tasks(&TaskFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));

    assert!(manager.store().snapshot().is_empty());
    assert!(!token_file.exists());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
    assert_eq!(
        manager.check_navigation("/tasks"),
        Navigation::Redirect("/login".to_string())
    );

    // Without a session nothing reaches the server
    let err = manager
        .api()
        .list_tasks(&TaskFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NoSession));
}

#[tokio::test]
async fn test_rotated_refresh_token_is_persisted() {
    let server = MockServer::start().await;
    mount_expired_token_tasks(&server, 1, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "R1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": "T2",
            "refresh": "R2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStore::new(dir.path().join(TOKEN_FILE)));
    let manager = manager(&server, storage.clone());
    manager.store().set_session(None, Credential::new("T1", "R1"));

    manager.api().list_tasks(&TaskFilter::default()).await.unwrap();

    assert_eq!(manager.store().refresh_token().as_deref(), Some("R2"));
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_login_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login/"))
        .and(body_json(json!({"email": "grace@example.com", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": user_json(),
            "tokens": {"access": "A1", "refresh": "R1"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join(TOKEN_FILE);

    let first = manager(&server, Arc::new(FileStore::new(token_file.clone())));
    assert_eq!(first.check_navigation("/tasks"), Navigation::Redirect("/login".to_string()));
    let user = first.login("grace@example.com", "hunter2").await.unwrap();
    assert_eq!(user.username, "grace");
    drop(first);

    let second = manager(&server, Arc::new(FileStore::new(token_file)));
    assert!(second.initialize().await);
    assert_eq!(second.current_user().map(|u| u.id), Some(3));
    assert_eq!(second.check_navigation("/tasks"), Navigation::Proceed);
}

#[tokio::test]
async fn test_bad_credentials_are_reported_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "X"})))
        .expect(0)
        .mount(&server)
        .await;

    let manager = manager(&server, Arc::new(MemoryStore::new()));
    let err = manager.login("grace@example.com", "nope").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(!manager.is_authenticated());
}
