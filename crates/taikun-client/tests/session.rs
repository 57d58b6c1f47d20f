#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the transport: token lifecycle, error mapping and
//! pagination against a mock platform.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use taikun_client::{ApiClient, AuthManager, TokenPair};
use taikun_core::config::{ApiConfig, AuthBackend, Credentials};
use taikun_core::{Error, ErrorKind};

fn jwt(exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"ops"}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature")
}

fn far_future() -> String {
    jwt(10_000_000_000_000)
}

fn credentials(backend: AuthBackend) -> Credentials {
    Credentials {
        email: "ops@example.com".into(),
        password: "s3cret".into(),
        backend,
    }
}

fn client(server: &MockServer, backend: AuthBackend) -> ApiClient {
    let api = ApiConfig {
        base_url: server.uri(),
        ..ApiConfig::default()
    };
    ApiClient::new(&api, credentials(backend)).unwrap()
}

fn seeded(server: &MockServer, pair: TokenPair) -> ApiClient {
    let base = client(server, AuthBackend::Default);
    let auth = AuthManager::new(
        base.http().clone(),
        base.api_root().to_string(),
        credentials(AuthBackend::Default),
    )
    .with_tokens(pair);
    base.with_auth(auth)
}

#[derive(Debug, Deserialize, PartialEq)]
struct Row {
    id: i32,
}

// =========================================================================
// Token lifecycle
// =========================================================================

#[tokio::test]
async fn expired_token_is_refreshed_once_before_the_call() {
    let server = MockServer::start().await;
    let fresh = far_future();

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({"token": jwt(0), "refreshToken": "refresh-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": fresh, "refreshToken": "refresh-2"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .and(header("Authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "totalCount": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client = seeded(
        &server,
        TokenPair {
            token: jwt(0),
            refresh_token: "refresh-1".into(),
        },
    );
    let rows: Vec<Row> = client.list_all("/Projects/list", &[]).await.unwrap();
    assert!(rows.is_empty());

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, vec!["/api/v1/auth/refresh", "/api/v1/Projects/list"]);

    let tokens = client.auth().tokens().await.unwrap();
    assert_eq!(tokens.refresh_token, "refresh-2");
}

#[tokio::test]
async fn first_call_logs_in_and_reuses_token() {
    let server = MockServer::start().await;
    let token = far_future();

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_json(json!({"email": "ops@example.com", "password": "s3cret"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": token, "refreshToken": "r"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Users/list"))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}], "totalCount": 1})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, AuthBackend::Default);
    for _ in 0..2 {
        let rows: Vec<Row> = client.list_all("/Users/list", &[]).await.unwrap();
        assert_eq!(rows, vec![Row { id: 1 }]);
    }
}

#[tokio::test]
async fn federated_backend_uses_keycloak_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/keycloak/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": far_future(), "refreshToken": "r"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Organizations/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "totalCount": 0})))
        .mount(&server)
        .await;

    let client = client(&server, AuthBackend::Federated);
    let rows: Vec<Row> = client.list_all("/Organizations/list", &[]).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn login_failure_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid credentials", "statusCode": 400})),
        )
        .mount(&server)
        .await;

    let client = client(&server, AuthBackend::Default);
    let err = client
        .get::<serde_json::Value>("/Projects/list", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn refresh_failure_does_not_fall_back_to_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = seeded(
        &server,
        TokenPair {
            token: jwt(0),
            refresh_token: "stale".into(),
        },
    );
    for _ in 0..2 {
        let err = client
            .get::<serde_json::Value>("/Projects/list", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}

#[tokio::test]
async fn concurrent_calls_share_one_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": far_future(), "refreshToken": "r"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "totalCount": 0})))
        .expect(4)
        .mount(&server)
        .await;

    let client = client(&server, AuthBackend::Default);
    let calls = (0..4).map(|_| {
        let c = client.clone();
        tokio::spawn(async move { c.get::<serde_json::Value>("/Projects/list", &[]).await })
    });
    for handle in calls.collect::<Vec<_>>() {
        handle.await.unwrap().unwrap();
    }
}

// =========================================================================
// Error mapping
// =========================================================================

#[tokio::test]
async fn platform_error_carries_status_and_message() {
    let server = MockServer::start().await;
    let client = seeded(
        &server,
        TokenPair {
            token: far_future(),
            refresh_token: "r".into(),
        },
    );
    Mock::given(method("POST"))
        .and(path("/api/v1/AccessProfiles/create"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"message": "Name already exists", "statusCode": 409})),
        )
        .mount(&server)
        .await;

    let err = client
        .post::<_, serde_json::Value>("/AccessProfiles/create", &json!({"name": "dup"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert!(err.to_string().contains("Name already exists"));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn not_found_status_maps_to_not_found() {
    let server = MockServer::start().await;
    let client = seeded(
        &server,
        TokenPair {
            token: far_future(),
            refresh_token: "r".into(),
        },
    );
    Mock::given(method("DELETE"))
        .and(path("/api/v1/AccessProfiles/9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client.delete("/AccessProfiles/9").await.unwrap_err();
    assert!(err.is_not_found());
}

// =========================================================================
// Pagination
// =========================================================================

#[tokio::test]
async fn pager_accumulates_until_total() {
    let server = MockServer::start().await;
    let client = seeded(
        &server,
        TokenPair {
            token: far_future(),
            refresh_token: "r".into(),
        },
    );
    Mock::given(method("GET"))
        .and(path("/api/v1/Flavors/aws/3"))
        .and(query_param("Offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 1}, {"id": 2}, {"id": 3}],
            "totalCount": 5
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Flavors/aws/3"))
        .and(query_param("Offset", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 4}, {"id": 5}],
            "totalCount": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rows: Vec<Row> = client.list_all("/Flavors/aws/3", &[]).await.unwrap();
    let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
