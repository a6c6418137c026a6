//! Integration tests for the credential lifecycle against a mock identity
//! provider.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use streambot::auth::{
    AuthError, CredentialStore, Identity, IdentityKind, Lifecycle, ProviderConfig, TokenFile,
    TokenPair,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer, data_dir: &Path) -> CredentialStore {
    let identity = Identity {
        kind: IdentityKind::Bot,
        id: "1234".to_string(),
        display_name: "botty".to_string(),
        scope: "chat:read chat:edit".to_string(),
    };
    let provider = ProviderConfig {
        base_url: server.uri(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: "http://localhost:3000/redirect".to_string(),
        headless: true,
    };
    CredentialStore::new(identity, provider, TokenFile::new(data_dir, IdentityKind::Bot))
}

fn seed_tokens(data_dir: &Path, access: &str, refresh: &str) {
    std::fs::write(
        data_dir.join("bot.json"),
        serde_json::to_string(&json!({"access_token": access, "refresh_token": refresh})).unwrap(),
    )
    .unwrap();
}

fn on_disk(data_dir: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(data_dir.join("bot.json")).unwrap()).unwrap()
}

#[tokio::test]
async fn test_validate_success_builds_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("Authorization", "OAuth good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_id": "client",
            "login": "botty",
            "scopes": ["chat:read"],
            "user_id": "1234",
            "expires_in": 5000
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let validation = store(&server, dir.path()).validate("good").await.unwrap();
    assert_eq!(validation.data.login, "botty");
    assert_eq!(
        validation.message,
        r#"botty with ["chat:read"] scopes was successfully validated"#
    );
}

#[tokio::test]
async fn test_validate_classifies_by_message_not_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("Authorization", "OAuth stale"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"status": 401, "message": "invalid access token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("Authorization", "OAuth blank"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"status": 401, "message": "missing authorization token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("Authorization", "OAuth weird"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"status": 401, "message": "nope"})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = store(&server, dir.path());
    assert_eq!(store.validate("stale").await, Err(AuthError::InvalidAccessToken));
    assert_eq!(store.validate("blank").await, Err(AuthError::MissingAuthorizationToken));
    assert_eq!(
        store.validate("weird").await,
        Err(AuthError::Unknown(json!({"status": 401, "message": "nope"})))
    );
}

#[tokio::test]
async fn test_validate_non_json_body_is_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let error = store(&server, dir.path()).validate("any").await.unwrap_err();
    assert!(matches!(error, AuthError::Request { .. }));
    assert!(error.to_string().starts_with("Validated token error:"));
}

#[tokio::test]
async fn test_lifecycle_refreshes_rejected_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"status": 401, "message": "invalid access token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(query_param("refresh_token", "refresh-1"))
        .and(query_param("client_id", "client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    seed_tokens(dir.path(), "access-1", "refresh-1");
    let store = Arc::new(store(&server, dir.path()));
    let mut authenticated = store.subscribe();

    let lifecycle = store.run_lifecycle().await;
    let expected = TokenPair {
        access_token: "access-2".to_string(),
        refresh_token: "refresh-2".to_string(),
    };
    assert_eq!(lifecycle, Lifecycle::Authenticated(expected.clone()));
    assert_eq!(store.tokens(), expected);
    assert_eq!(
        on_disk(dir.path()),
        json!({"access_token": "access-2", "refresh_token": "refresh-2"})
    );

    authenticated.changed().await.unwrap();
    assert_eq!(*authenticated.borrow(), Some(expected));
}

#[tokio::test]
async fn test_lifecycle_rejected_refresh_starts_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"status": 401, "message": "invalid access token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"status": 400, "message": "Invalid refresh token"})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    seed_tokens(dir.path(), "access-1", "refresh-1");
    let store = store(&server, dir.path());

    match store.run_lifecycle().await {
        Lifecycle::AwaitingAuthorization { url } => {
            assert!(url.starts_with(&format!("{}/authorize?", server.uri())));
            assert!(url.contains("client_id=client"));
            assert!(url.contains("response_type=code"));
        }
        other => panic!("expected authorization, got {other:?}"),
    }
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_lifecycle_unclassified_validate_stays_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    seed_tokens(dir.path(), "access-1", "refresh-1");
    let store = store(&server, dir.path());

    assert!(matches!(
        store.run_lifecycle().await,
        Lifecycle::Unauthenticated {
            reason: AuthError::Unknown(_)
        }
    ));
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_complete_authorization_exchanges_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "fresh-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = store(&server, dir.path());
    let url = store.authorize().unwrap();
    let state = reqwest::Url::parse(&url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    assert_eq!(
        store.complete_authorization("forged", "the-code").await,
        Err(AuthError::StateMismatch)
    );

    let pair = store.complete_authorization(&state, "the-code").await.unwrap();
    assert_eq!(pair.access_token, "fresh");
    assert!(store.is_authenticated());
    assert_eq!(
        on_disk(dir.path()),
        json!({"access_token": "fresh", "refresh_token": "fresh-refresh"})
    );
}

#[tokio::test]
async fn test_start_on_listening_waits_for_signal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "botty"})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    seed_tokens(dir.path(), "access-1", "refresh-1");
    let store = Arc::new(store(&server, dir.path()));

    let (listening_tx, listening_rx) = tokio::sync::watch::channel(false);
    let task = store.start_on_listening(listening_rx);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    assert!(!store.is_authenticated());

    listening_tx.send_replace(true);
    let lifecycle = task.await.unwrap();
    assert!(matches!(lifecycle, Lifecycle::Authenticated(_)));
    assert!(store.is_authenticated());
}
