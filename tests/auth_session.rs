//! Session Lifecycle Tests
//!
//! Exercises connect, transparent re-login, the scheduled refresh task,
//! inactivity timeouts, logout and resuming a persisted session against a
//! wiremock server.

use chrono::{Duration as ChronoDuration, Utc};
use nimbus_sdk::nimbus_api::session::Credentials;
use nimbus_sdk::storage::MemoryStorage;
use nimbus_sdk::{
    ApiError, ClientConfig, ConnectOptions, NimbusClient, NimbusError, Session, SessionEvent,
    SessionStore,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const LOGIN_PATH: &str = "/auth/v1/acme/main/login";

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(server.uri())
        .with_account("acme")
        .with_realm("main")
}

fn login_response(token: &str, expires_in: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "expires_in": expires_in,
        "token_type": "Bearer",
        "user_id": "user-1"
    }))
}

fn document(id: &str) -> serde_json::Value {
    json!({"id": id, "collection": "orders", "data": {"total": 12}})
}

/// Wait for the first event matching `pred`, failing after `within`
async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    within: Duration,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_then_call_uses_bearer_token_and_transaction_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({"username": "ada", "password": "pw"})))
        .respond_with(login_response("tok-1", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/documents/v1/acme/main/orders/order-42"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("order-42")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let mut events = client.subscribe();

    let session = client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(session.username, "ada");
    assert_eq!(session.user_id.as_deref(), Some("user-1"));
    assert!(client.is_connected().await);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Connected {
            username: "ada".to_string()
        }
    );

    let doc = client.documents().get("orders", "order-42").await.unwrap();
    assert_eq!(doc.data["total"], 12);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let txid = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "txid")
            .map(|(_, v)| v.into_owned());
        assert!(txid.map(|v| !v.is_empty()).unwrap_or(false), "missing txid on {}", request.url);
    }
}

#[tokio::test]
async fn test_connect_rejected_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "invalid_credentials",
            "message": "Username or password is wrong"
        })))
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let err = client
        .auth()
        .connect("ada", "wrong", ConnectOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("invalid_credentials"));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_connect_rejects_out_of_range_token_lifetime() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 10_000_000_000_000))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let err = client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, NimbusError::Api(ApiError::Parse(_))), "{:?}", err);
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_call_without_session_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let err = client.documents().get("orders", "order-42").await.unwrap_err();
    assert!(matches!(err, NimbusError::Session(_)));
}

// ============================================================================
// Re-login
// ============================================================================

#[tokio::test]
async fn test_token_near_expiry_is_renewed_before_call() {
    let mock_server = MockServer::start().await;

    // First token is already inside the default 60s refresh margin.
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok-short", 30))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok-long", 3600))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/documents/v1/acme/main/orders/order-1"))
        .and(header("Authorization", "Bearer tok-long"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("order-1")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();

    client.documents().get("orders", "order-1").await.unwrap();
    assert_eq!(client.session().await.unwrap().access_token, "tok-long");
}

#[tokio::test]
async fn test_refresh_task_renews_token_before_expiry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 2))
        .expect(2..)
        .mount(&mock_server)
        .await;

    let config = config(&mock_server).with_refresh_margin(Duration::from_secs(1));
    let client = NimbusClient::new(config).unwrap();
    let mut events = client.subscribe();

    let first = client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();

    let event = wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SessionEvent::Refreshed { .. })
    })
    .await;
    match event {
        SessionEvent::Refreshed { expires_at } => assert!(expires_at > first.expires_at),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_inactive_session_is_dropped_instead_of_renewed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 3))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = config(&mock_server).with_refresh_margin(Duration::from_secs(1));
    let client = NimbusClient::new(config).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect(
            "ada",
            "pw",
            ConnectOptions::default().with_inactivity_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    wait_for(&mut events, Duration::from_secs(6), |e| {
        *e == SessionEvent::InactivityTimeout
    })
    .await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_scheduled_relogins_do_not_keep_idle_session_alive() {
    let mock_server = MockServer::start().await;

    // Tokens are renewed every second, well inside the 3s inactivity timeout.
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 2))
        .expect(2..)
        .mount(&mock_server)
        .await;

    let config = config(&mock_server).with_refresh_margin(Duration::from_secs(1));
    let client = NimbusClient::new(config).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect(
            "ada",
            "pw",
            ConnectOptions::default().with_inactivity_timeout(Duration::from_secs(3)),
        )
        .await
        .unwrap();

    wait_for(&mut events, Duration::from_secs(8), |e| {
        *e == SessionEvent::InactivityTimeout
    })
    .await;
    assert!(!client.is_connected().await);

    let logins = mock_server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(mock_server.received_requests().await.unwrap().len(), logins);
}

#[tokio::test]
async fn test_caller_activity_keeps_session_alive_across_relogins() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 2))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents/v1/acme/main/orders/order-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("order-1")))
        .mount(&mock_server)
        .await;

    let config = config(&mock_server).with_refresh_margin(Duration::from_secs(1));
    let client = NimbusClient::new(config).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect(
            "ada",
            "pw",
            ConnectOptions::default().with_inactivity_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(800)).await;
        client.documents().get("orders", "order-1").await.unwrap();
    }
    assert!(client.is_connected().await);

    while let Ok(event) = events.try_recv() {
        assert_ne!(event, SessionEvent::InactivityTimeout);
    }
    client.auth().disconnect().await.unwrap();
}

#[tokio::test]
async fn test_idle_session_without_credentials_ends_before_token_expiry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect(
            "ada",
            "pw",
            ConnectOptions::default()
                .remember_credentials(false)
                .with_inactivity_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    wait_for(&mut events, Duration::from_secs(4), |e| {
        *e == SessionEvent::InactivityTimeout
    })
    .await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_failed_relogins_end_session_when_token_expires() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 2))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "message": "auth backend unavailable"
        })))
        .expect(1..)
        .mount(&mock_server)
        .await;

    let store = SessionStore::with_backend(Arc::new(MemoryStorage::new()));
    let config = config(&mock_server)
        .with_refresh_margin(Duration::from_secs(1))
        .with_refresh_retry_delay(Duration::from_millis(200));
    let client = NimbusClient::with_store(config, store.clone()).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();

    match wait_for(&mut events, Duration::from_secs(3), |e| {
        matches!(e, SessionEvent::RefreshFailed { .. })
    })
    .await
    {
        SessionEvent::RefreshFailed { message } => {
            assert!(message.contains("auth backend unavailable"), "{}", message)
        }
        other => panic!("unexpected event {:?}", other),
    }
    // Still usable until the token itself runs out.
    assert!(client.is_connected().await);

    wait_for(&mut events, Duration::from_secs(4), |e| *e == SessionEvent::Expired).await;
    assert!(!client.is_connected().await);
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_without_credentials_expires() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default().remember_credentials(false))
        .await
        .unwrap();

    wait_for(&mut events, Duration::from_secs(5), |e| *e == SessionEvent::Expired).await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_disconnect_stops_refresh_task() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok", 2))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = config(&mock_server).with_refresh_margin(Duration::from_secs(1));
    let client = NimbusClient::new(config).unwrap();
    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();

    client.auth().disconnect().await.unwrap();
    assert!(!client.is_connected().await);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    // The mock's expect(1) is verified on drop.
}

// ============================================================================
// Logout and password changes
// ============================================================================

#[tokio::test]
async fn test_logout_invalidates_token_and_clears_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok-1", 3600))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/acme/main/logout"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SessionStore::with_backend(Arc::new(MemoryStorage::new()));
    let client = NimbusClient::with_store(config(&mock_server), store.clone()).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();
    assert!(store.load().await.unwrap().is_some());

    client.auth().logout().await.unwrap();

    assert!(!client.is_connected().await);
    assert!(store.load().await.unwrap().is_none());
    wait_for(&mut events, Duration::from_secs(1), |e| {
        *e == SessionEvent::Disconnected
    })
    .await;
}

#[tokio::test]
async fn test_logout_clears_session_even_when_server_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok-1", 3600))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/acme/main/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "internal",
            "message": "logout failed"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SessionStore::with_backend(Arc::new(MemoryStorage::new()));
    let client = NimbusClient::with_store(config(&mock_server), store.clone()).unwrap();
    let mut events = client.subscribe();

    client
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();

    let err = client.auth().logout().await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("logout failed"));

    assert!(!client.is_connected().await);
    assert!(store.load().await.unwrap().is_none());
    wait_for(&mut events, Duration::from_secs(1), |e| {
        *e == SessionEvent::Disconnected
    })
    .await;
}

#[tokio::test]
async fn test_change_password_updates_remembered_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({"username": "ada", "password": "old-pw"})))
        .respond_with(login_response("tok-1", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/auth/v1/acme/main/users/ada/password"))
        .and(body_json(json!({"old_password": "old-pw", "new_password": "new-pw"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({"username": "ada", "password": "new-pw"})))
        .respond_with(login_response("tok-2", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    client
        .auth()
        .connect("ada", "old-pw", ConnectOptions::default())
        .await
        .unwrap();

    client
        .auth()
        .change_password("ada", "old-pw", "new-pw")
        .await
        .unwrap();

    let session = client.auth().refresh().await.unwrap();
    assert_eq!(session.access_token, "tok-2");
}

#[tokio::test]
async fn test_validate_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/acme/main/token"))
        .and(header("Authorization", "Bearer some-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "username": "ada",
            "expires_in": 120,
            "permissions": ["documents:read"]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = NimbusClient::new(config(&mock_server)).unwrap();
    let info = client.auth().validate_token("some-token").await.unwrap();
    assert!(info.valid);
    assert_eq!(info.username.as_deref(), Some("ada"));
    assert_eq!(info.permissions, vec!["documents:read".to_string()]);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_restores_persisted_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok-1", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = Arc::new(MemoryStorage::new());

    let first = NimbusClient::with_store(
        config(&mock_server),
        SessionStore::with_backend(backend.clone()),
    )
    .unwrap();
    first
        .auth()
        .connect("ada", "pw", ConnectOptions::default())
        .await
        .unwrap();
    drop(first);

    let second =
        NimbusClient::with_store(config(&mock_server), SessionStore::with_backend(backend)).unwrap();
    let resumed = second.auth().resume().await.unwrap().expect("session persisted");
    assert_eq!(resumed.username, "ada");
    assert_eq!(resumed.access_token, "tok-1");
    assert!(second.is_connected().await);
}

#[tokio::test]
async fn test_resume_discards_inactive_session() {
    let mock_server = MockServer::start().await;
    let store = SessionStore::with_backend(Arc::new(MemoryStorage::new()));

    let now = Utc::now();
    let stale = Session {
        account: "acme".to_string(),
        realm: "main".to_string(),
        username: "ada".to_string(),
        user_id: None,
        access_token: "tok-old".to_string(),
        expires_at: now + ChronoDuration::hours(1),
        last_active: now - ChronoDuration::hours(2),
        inactivity_timeout_secs: Some(60),
        credentials: Some(Credentials {
            password: SecretString::new("pw".to_string()),
        }),
    };
    store.save(&stale).await.unwrap();

    let client = NimbusClient::with_store(config(&mock_server), store.clone()).unwrap();
    assert!(client.auth().resume().await.unwrap().is_none());
    assert!(!client.is_connected().await);
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_renews_expired_session_with_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({"username": "ada", "password": "pw"})))
        .respond_with(login_response("tok-new", 3600))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SessionStore::with_backend(Arc::new(MemoryStorage::new()));
    let now = Utc::now();
    store
        .save(&Session {
            account: "acme".to_string(),
            realm: "main".to_string(),
            username: "ada".to_string(),
            user_id: None,
            access_token: "tok-old".to_string(),
            expires_at: now - ChronoDuration::minutes(5),
            last_active: now,
            inactivity_timeout_secs: None,
            credentials: Some(Credentials {
                password: SecretString::new("pw".to_string()),
            }),
        })
        .await
        .unwrap();

    let client = NimbusClient::with_store(config(&mock_server), store).unwrap();
    let session = client.auth().resume().await.unwrap().unwrap();
    assert_eq!(session.access_token, "tok-new");
    assert!(!session.is_expired());
}
