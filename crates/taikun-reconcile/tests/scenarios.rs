#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Reconcilers against a mock platform: read-after-create, label replacement
//! and lock mediation.

mod support;

use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use taikun_core::convert::PrometheusType;
use taikun_reconcile::binding::Label;
use taikun_reconcile::resources::billing_rule::BillingRuleSpec;
use taikun_reconcile::resources::policy_profile::PolicyProfileSpec;
use taikun_reconcile::resources::{BillingRules, PolicyProfiles};
use taikun_core::Error;
use taikun_reconcile::{Intent, Kind, Reconciler, Verb, dispatch};

use support::{body, calls, empty_page, page, platform};

// =========================================================================
// Read after create
// =========================================================================

#[tokio::test]
async fn create_waits_out_delayed_visibility() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/OpaProfiles/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .and(query_param("Id", "42"))
        .respond_with(empty_page())
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .and(query_param("Id", "42"))
        .respond_with(page(json!([{"id": 42, "name": "strict", "uniqueIngresses": true}])))
        .mount(&server)
        .await;

    let spec = PolicyProfileSpec {
        name: "strict".into(),
        unique_ingress: true,
        ..PolicyProfileSpec::default()
    };
    let observed = PolicyProfiles::new(platform(&server)).create(&spec).await.unwrap();
    assert_eq!(observed.id, "42");
    assert_eq!(observed.spec, spec);

    let reads = calls(&server)
        .await
        .into_iter()
        .filter(|c| c == "GET /OpaProfiles/list")
        .count();
    assert_eq!(reads, 3);
}

#[tokio::test]
async fn dispatch_reads_by_kind_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .and(query_param("Id", "9"))
        .respond_with(page(json!([{"id": 9, "name": "strict", "isLocked": true}])))
        .mount(&server)
        .await;

    let intent = Intent {
        verb: Verb::Read,
        id: Some("9".into()),
        desired: None,
    };
    let kind: Kind = "policy-profile".parse().unwrap();
    let out = dispatch(kind, platform(&server), &intent).await.unwrap();
    assert_eq!(out["id"], json!("9"));
    assert_eq!(out["lock"], json!(true));
}

#[tokio::test]
async fn missing_entity_reads_as_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .respond_with(empty_page())
        .mount(&server)
        .await;

    let err = PolicyProfiles::new(platform(&server)).read("5").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.exit_code(), 2);
}

// =========================================================================
// Rule label replacement
// =========================================================================

fn rule_row(labels: serde_json::Value) -> serde_json::Value {
    json!([{
        "id": 12,
        "name": "cpu-hours",
        "metricName": "node_cpu_seconds_total",
        "price": 0.5,
        "type": "SUM",
        "operationCredentialId": 3,
        "labels": labels,
        "boundOrganizations": []
    }])
}

#[tokio::test]
async fn rule_update_replaces_every_label() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/PrometheusRules/list"))
        .respond_with(page(rule_row(json!([
            {"id": 11, "key": "a", "value": "1"},
            {"id": 12, "key": "b", "value": "2"}
        ]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/PrometheusRules/list"))
        .respond_with(page(rule_row(json!([
            {"id": 13, "key": "b", "value": "2"},
            {"id": 14, "key": "c", "value": "3"}
        ]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/PrometheusRules/update/12"))
        .and(body_partial_json(json!({
            "labelsToAdd": [{"key": "b", "value": "2"}, {"key": "c", "value": "3"}],
            "labelsToDelete": [{"id": 11}, {"id": 12}]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let desired = BillingRuleSpec {
        name: "cpu-hours".into(),
        metric_name: "node_cpu_seconds_total".into(),
        price: 0.5,
        kind: PrometheusType::Sum,
        billing_credential_id: "3".into(),
        labels: vec![Label::new("b", "2"), Label::new("c", "3")],
        organizations: None,
    };
    let observed = BillingRules::new(platform(&server)).update("12", &desired).await.unwrap();
    assert_eq!(observed.spec.labels, desired.labels);
}

// =========================================================================
// Lock mediation
// =========================================================================

struct FakeProfile {
    locked: bool,
    name: String,
}

#[tokio::test]
async fn locked_profile_is_unlocked_updated_and_relocked() {
    let server = MockServer::start().await;
    let state = Arc::new(Mutex::new(FakeProfile {
        locked: true,
        name: "alpha".into(),
    }));

    let s = Arc::clone(&state);
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .respond_with(move |_: &Request| {
            let s = s.lock().unwrap();
            page(json!([{"id": 7, "name": s.name, "isLocked": s.locked}]))
        })
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("POST"))
        .and(path("/api/v1/OpaProfiles/lockmanager"))
        .respond_with(move |req: &Request| {
            s.lock().unwrap().locked = body(req)["mode"] == "lock";
            ResponseTemplate::new(200)
        })
        .expect(2)
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("PUT"))
        .and(path("/api/v1/OpaProfiles/update"))
        .respond_with(move |req: &Request| {
            let b = body(req);
            assert!(!s.lock().unwrap().locked, "mutation must run unlocked");
            s.lock().unwrap().name = b["name"].as_str().unwrap().to_string();
            ResponseTemplate::new(200)
        })
        .expect(1)
        .mount(&server)
        .await;

    let desired = PolicyProfileSpec {
        name: "bravo".into(),
        lock: true,
        ..PolicyProfileSpec::default()
    };
    let observed = PolicyProfiles::new(platform(&server)).update("7", &desired).await.unwrap();
    assert_eq!(observed.spec.name, "bravo");
    assert!(observed.spec.lock);

    let requests = server.received_requests().await.unwrap();
    let mutations: Vec<String> = requests
        .iter()
        .filter(|r| r.method.as_str() != "GET")
        .map(|r| {
            let b = body(r);
            match b["mode"].as_str() {
                Some(mode) => mode.to_string(),
                None => format!("put {}", b["name"].as_str().unwrap()),
            }
        })
        .collect();
    assert_eq!(mutations, vec!["unlock", "put bravo", "lock"]);
}

#[tokio::test]
async fn unlocked_profile_without_changes_is_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .respond_with(page(json!([{"id": 7, "name": "alpha"}])))
        .mount(&server)
        .await;

    let desired = PolicyProfileSpec {
        name: "alpha".into(),
        ..PolicyProfileSpec::default()
    };
    PolicyProfiles::new(platform(&server)).update("7", &desired).await.unwrap();
    assert!(calls(&server).await.iter().all(|c| c.starts_with("GET")));
}

#[tokio::test]
async fn locked_profile_is_deleted_once_the_unlock_is_observed() {
    let server = MockServer::start().await;
    let state = Arc::new(Mutex::new(FakeProfile {
        locked: true,
        name: "alpha".into(),
    }));

    let s = Arc::clone(&state);
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .respond_with(move |_: &Request| {
            let s = s.lock().unwrap();
            page(json!([{"id": 7, "name": s.name, "isLocked": s.locked}]))
        })
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("POST"))
        .and(path("/api/v1/OpaProfiles/lockmanager"))
        .respond_with(move |req: &Request| {
            s.lock().unwrap().locked = body(req)["mode"] == "lock";
            ResponseTemplate::new(200)
        })
        .expect(1)
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("DELETE"))
        .and(path("/api/v1/OpaProfiles/7"))
        .respond_with(move |_: &Request| {
            assert!(!s.lock().unwrap().locked, "delete must run unlocked");
            ResponseTemplate::new(200)
        })
        .expect(1)
        .mount(&server)
        .await;

    PolicyProfiles::new(platform(&server)).delete("7").await.unwrap();

    let log = calls(&server).await;
    let unlock = log.iter().position(|c| c == "POST /OpaProfiles/lockmanager").unwrap();
    let delete = log.iter().position(|c| c == "DELETE /OpaProfiles/7").unwrap();
    assert!(
        log[unlock..delete].iter().any(|c| c == "GET /OpaProfiles/list"),
        "unlock must be observed before the delete: {log:?}"
    );
}

#[tokio::test]
async fn delete_of_a_profile_that_stays_locked_is_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/OpaProfiles/list"))
        .respond_with(page(json!([{"id": 7, "name": "alpha", "isLocked": true}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/OpaProfiles/lockmanager"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = PolicyProfiles::new(platform(&server)).delete("7").await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err}");
    assert!(calls(&server).await.iter().all(|c| !c.starts_with("DELETE")));
}
