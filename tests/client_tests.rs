use futures::future::join_all;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use ventu_rust::auth::{AuthError, AuthTokens, FileStorage, MemoryStorage, TokenStorage};
use ventu_rust::config::ClientOptions;
use ventu_rust::error::Error;
use ventu_rust::Ventu;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn access_token(ttl: i64, marker: &str) -> String {
    encode(
        &Header::default(),
        &json!({
            "exp": chrono::Utc::now().timestamp() + ttl,
            "jti": marker,
            "user_id": 5,
            "email": "leo@example.com",
            "role": "TRAVELER"
        }),
        &EncodingKey::from_secret(b"server-side-secret"),
    )
    .unwrap()
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn start() -> (MockServer, Ventu, Arc<MemoryStorage>) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "email": "leo@example.com",
            "role": "TRAVELER"
        })))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let ventu = Ventu::with_storage(&server.uri(), storage.clone(), ClientOptions::default());
    (server, ventu, storage)
}

#[tokio::test]
async fn test_anonymous_request_has_no_authorization() {
    let (server, ventu, _) = start().await;

    Mock::given(method("GET"))
        .and(path("/packages/"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(418))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/packages/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let packages: Value = ventu.api().get("/packages/").execute().await.unwrap();
    assert_eq!(packages[0]["id"], 1);
}

#[tokio::test]
async fn test_unreadable_session_file_sends_anonymously() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("authTokens.json")).unwrap();
    let ventu = Ventu::with_storage(
        &server.uri(),
        Arc::new(FileStorage::new(dir.path())),
        ClientOptions::default(),
    );

    Mock::given(method("GET"))
        .and(path("/packages/"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(418))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/packages/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 7}])))
        .expect(1)
        .mount(&server)
        .await;

    let packages: Value = ventu.api().get("/packages/").execute().await.unwrap();
    assert_eq!(packages[0]["id"], 7);
    assert!(matches!(
        ventu.auth().get_valid_access_token().await,
        Err(AuthError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_anonymous_401_is_passed_through() {
    let (server, ventu, _) = start().await;

    Mock::given(method("GET"))
        .and(path("/bookings/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Authentication credentials were not provided."
        })))
        .expect(1)
        .mount(&server)
        .await;

    match ventu.api().get("/bookings/").execute::<Value>().await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Authentication credentials were not provided.");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_request_carries_bearer_token() {
    let (server, ventu, _) = start().await;
    let access = access_token(600, "a1");
    ventu
        .auth()
        .login(AuthTokens::new(access.clone(), "R1"))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/bookings/"))
        .and(header("Authorization", bearer(&access).as_str()))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 12})))
        .expect(1)
        .mount(&server)
        .await;

    let booking: Value = ventu
        .api()
        .post("/bookings/")
        .json(&json!({"package": 3, "travelers": 2}))
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(booking["id"], 12);
}

#[tokio::test]
async fn test_without_auth_skips_credentials() {
    let (server, ventu, _) = start().await;
    ventu
        .auth()
        .login(AuthTokens::new(access_token(600, "a1"), "R1"))
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/packages/"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(418))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/packages/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let response = ventu
        .api()
        .get("/packages/")
        .without_auth()
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_401_refreshes_and_replays_once() {
    let (server, ventu, storage) = start().await;
    let revoked = access_token(600, "a1");
    let fresh = access_token(600, "a2");
    ventu
        .auth()
        .login(AuthTokens::new(revoked.clone(), "R1"))
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/bookings/"))
        .and(header("Authorization", bearer(&revoked).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bookings/"))
        .and(header("Authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 12}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": fresh})))
        .expect(1)
        .mount(&server)
        .await;

    let bookings: Value = ventu.api().get("/bookings/").execute().await.unwrap();
    assert_eq!(bookings[0]["id"], 12);

    let raw = storage.get_item("authTokens").await.unwrap().unwrap();
    let tokens: AuthTokens = serde_json::from_str(&raw).unwrap();
    assert_eq!(tokens, AuthTokens::new(fresh, "R1"));
}

#[tokio::test]
async fn test_second_401_is_not_retried_again() {
    let (server, ventu, _) = start().await;
    ventu
        .auth()
        .login(AuthTokens::new(access_token(600, "a1"), "R1"))
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/dashboard/packages/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "You do not have an operator account."
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": access_token(600, "a2")})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = ventu
        .api()
        .get("/dashboard/packages/")
        .execute::<Value>()
        .await;
    assert!(matches!(result, Err(Error::Api { status: 401, .. })));
    // The session itself is still good
    assert!(ventu.auth().is_authenticated());
}

#[tokio::test]
async fn test_concurrent_requests_with_expired_token() {
    let (server, ventu, _) = start().await;
    let fresh = access_token(600, "a2");
    ventu
        .auth()
        .login(AuthTokens::new(access_token(-1, "a1"), "R1"))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": fresh}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bookings/"))
        .and(header("Authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(5)
        .mount(&server)
        .await;

    let api = ventu.api();
    let results = join_all((0..5).map(|_| async { api.get("/bookings/").execute::<Value>().await })).await;
    for result in results {
        assert_eq!(result.unwrap(), json!([]));
    }
}

#[tokio::test]
async fn test_failed_refresh_rejects_every_request() {
    let (server, ventu, storage) = start().await;
    ventu
        .auth()
        .login(AuthTokens::new(access_token(-1, "a1"), "R1"))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bookings/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let api = ventu.api();
    let results = join_all((0..5).map(|_| async { api.get("/bookings/").send().await })).await;
    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_session_error(), "unexpected error: {:?}", err);
    }

    assert!(storage.get_item("authTokens").await.unwrap().is_none());
    assert!(!ventu.auth().is_authenticated());
}

#[tokio::test]
async fn test_refresh_call_401_through_wrapper_ends_session() {
    let (server, ventu, storage) = start().await;
    ventu
        .auth()
        .login(AuthTokens::new(access_token(600, "a1"), "R1"))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = ventu
        .api()
        .post("/token/refresh/")
        .json(&json!({"refresh": "R1"}))
        .unwrap()
        .send()
        .await;

    assert!(result.unwrap_err().is_session_error());
    assert!(!ventu.auth().is_authenticated());
    assert!(storage.get_item("authTokens").await.unwrap().is_none());
}
