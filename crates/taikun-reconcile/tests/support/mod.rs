#![allow(dead_code)] // Each test binary uses a subset of the fixtures

//! Shared fixtures: a session against a mock platform with a valid token
//! already in place, and wait budgets shrunk to milliseconds.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use wiremock::{MockServer, Request, ResponseTemplate};

use taikun_client::{ApiClient, AuthManager, TokenPair};
use taikun_core::config::{ApiConfig, AuthBackend, Credentials};
use taikun_reconcile::{Platform, WaitPolicy};

fn jwt(exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"ops"}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature")
}

pub fn fast_policy() -> WaitPolicy {
    WaitPolicy {
        read_after_create: Duration::from_secs(2),
        read_after_update: Duration::from_secs(2),
        toggle: Duration::from_secs(2),
        provisioning: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        first_poll_delay: Duration::from_millis(5),
        retry_interval: Duration::from_millis(10),
    }
}

pub fn platform(server: &MockServer) -> Platform {
    let api = ApiConfig {
        base_url: server.uri(),
        ..ApiConfig::default()
    };
    let credentials = Credentials {
        email: "ops@example.com".into(),
        password: "s3cret".into(),
        backend: AuthBackend::Default,
    };
    let base = ApiClient::new(&api, credentials.clone()).unwrap();
    let auth = AuthManager::new(base.http().clone(), base.api_root().to_string(), credentials).with_tokens(TokenPair {
        token: jwt(10_000_000_000_000),
        refresh_token: "refresh".into(),
    });
    Platform::new(base.with_auth(auth), fast_policy())
}

/// One list page holding every row.
pub fn page(rows: Value) -> ResponseTemplate {
    let total = rows.as_array().map_or(0, Vec::len);
    ResponseTemplate::new(200).set_body_json(json!({"data": rows, "totalCount": total}))
}

pub fn empty_page() -> ResponseTemplate {
    page(json!([]))
}

pub fn body(req: &Request) -> Value {
    serde_json::from_slice(&req.body).unwrap()
}

/// `METHOD /path` of every request the server has seen, in order.
pub async fn calls(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| format!("{} {}", r.method, r.url.path().trim_start_matches("/api/v1")))
        .collect()
}
