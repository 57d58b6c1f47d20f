#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! The project orchestrator against a stateful mock platform.

mod support;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use taikun_reconcile::Reconciler;
use taikun_reconcile::project::{ProjectSpec, Projects, ServerRole, ServerSpec};

use support::{body, calls, empty_page, page, platform};

/// Mount empty relation and topology lists for project 14.
async fn mount_empty_relations(server: &MockServer) {
    for p in [
        "/api/v1/Servers/list/14",
        "/api/v1/StandaloneVm/list",
        "/api/v1/Flavors/projects/list",
        "/api/v1/Images/projects/list",
    ] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(empty_page())
            .mount(server)
            .await;
    }
}

// =========================================================================
// Service toggles
// =========================================================================

/// A project whose backup switch settles after a couple of polls.
struct FakeProject {
    status: &'static str,
    backup_enabled: bool,
    credential: i32,
    settle: u32,
    pending: Option<(bool, i32)>,
}

impl FakeProject {
    fn poll(&mut self) -> serde_json::Value {
        if self.settle > 0 {
            self.settle -= 1;
            if self.settle == 0 {
                if let Some((enabled, credential)) = self.pending.take() {
                    self.backup_enabled = enabled;
                    self.credential = credential;
                }
                self.status = "Ready";
            }
        }
        json!([{
            "id": 14,
            "name": "prod",
            "cloudCredentialId": 3,
            "status": self.status,
            "isBackupEnabled": self.backup_enabled,
            "s3CredentialId": self.credential
        }])
    }

    fn start(&mut self, status: &'static str, enabled: bool, credential: i32) {
        self.status = status;
        self.settle = 2;
        self.pending = Some((enabled, credential));
    }
}

#[tokio::test]
async fn backup_moves_between_credentials_via_disable_then_enable() {
    let server = MockServer::start().await;
    mount_empty_relations(&server).await;
    let state = Arc::new(Mutex::new(FakeProject {
        status: "Ready",
        backup_enabled: true,
        credential: 1,
        settle: 0,
        pending: None,
    }));

    let s = Arc::clone(&state);
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(move |_: &Request| page(s.lock().unwrap().poll()))
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("POST"))
        .and(path("/api/v1/Backup/disablebackup"))
        .and(body_json(json!({"projectId": 14, "s3CredentialId": 1})))
        .respond_with(move |_: &Request| {
            s.lock().unwrap().start("DisableBackup", false, 1);
            ResponseTemplate::new(200)
        })
        .expect(1)
        .mount(&server)
        .await;
    let s = Arc::clone(&state);
    Mock::given(method("POST"))
        .and(path("/api/v1/Backup/enablebackup"))
        .and(body_json(json!({"projectId": 14, "s3CredentialId": 2})))
        .respond_with(move |req: &Request| {
            let credential = i32::try_from(body(req)["s3CredentialId"].as_i64().unwrap()).unwrap();
            s.lock().unwrap().start("EnableBackup", true, credential);
            ResponseTemplate::new(200)
        })
        .expect(1)
        .mount(&server)
        .await;

    let desired = ProjectSpec {
        name: "prod".into(),
        cloud_credential_id: "3".into(),
        backup_credential_id: Some("2".into()),
        ..ProjectSpec::default()
    };
    let observed = Projects::new(platform(&server)).update("14", &desired).await.unwrap();
    assert_eq!(observed.spec.backup_credential_id.as_deref(), Some("2"));
    assert_eq!(observed.computed.status, "Ready");

    let log = calls(&server).await;
    let disable = log.iter().position(|c| c == "POST /Backup/disablebackup").unwrap();
    let enable = log.iter().position(|c| c == "POST /Backup/enablebackup").unwrap();
    assert!(disable < enable);
    let polls_between = log[disable..enable]
        .iter()
        .filter(|c| *c == "GET /Projects/list")
        .count();
    assert!(polls_between >= 2, "flag and status polls expected, saw {polls_between}");
    let polls_after = log[enable..].iter().filter(|c| *c == "GET /Projects/list").count();
    assert!(polls_after >= 2);
}

#[tokio::test]
async fn immutable_change_is_rejected_before_any_mutation() {
    let server = MockServer::start().await;
    mount_empty_relations(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(page(json!([{"id": 14, "name": "prod", "cloudCredentialId": 3, "status": "Ready"}])))
        .mount(&server)
        .await;

    let desired = ProjectSpec {
        name: "prod".into(),
        cloud_credential_id: "4".into(),
        ..ProjectSpec::default()
    };
    let err = Projects::new(platform(&server)).update("14", &desired).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("cloud_credential_id"));
    assert!(calls(&server).await.iter().all(|c| c.starts_with("GET")));
}

// =========================================================================
// Create and delete
// =========================================================================

fn node(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.into(),
        flavor: "m5.large".into(),
        disk_size: 30,
        kubernetes_node_label: BTreeSet::new(),
    }
}

#[tokio::test]
async fn create_plants_topology_then_commits_and_waits_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/Projects/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 14})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(page(json!([{"id": 14, "name": "prod", "cloudCredentialId": 3, "status": "Pending"}])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(page(json!([{"id": 14, "name": "prod", "cloudCredentialId": 3, "status": "Ready"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Flavors/projects/list"))
        .respond_with(page(json!([{"id": 1, "name": "m5.large"}])))
        .mount(&server)
        .await;
    for p in ["/api/v1/Images/projects/list", "/api/v1/StandaloneVm/list"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(empty_page())
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/v1/Servers/list/14"))
        .respond_with(page(json!([
            {"id": 1, "name": "b", "role": 100, "flavor": "m5.large", "diskSize": 32_212_254_720_i64,
             "ipAddress": "10.0.0.5", "status": "Ready"},
            {"id": 2, "name": "m1", "role": 200, "flavor": "m5.large", "diskSize": 32_212_254_720_i64,
             "status": "Ready"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/Servers/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 0})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/Projects/commit/14"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let desired = ProjectSpec {
        name: "prod".into(),
        cloud_credential_id: "3".into(),
        flavors: ["m5.large".to_string()].into(),
        server_bastion: [node("b")].into(),
        server_kubemaster: [node("m1")].into(),
        ..ProjectSpec::default()
    };
    let observed = Projects::new(platform(&server)).create(&desired).await.unwrap();
    assert_eq!(observed.id, "14");
    assert_eq!(observed.spec.server_bastion, desired.server_bastion);
    assert_eq!(observed.spec.server_kubemaster, desired.server_kubemaster);
    assert_eq!(observed.computed.access_ip.as_deref(), Some("10.0.0.5"));

    let requests = server.received_requests().await.unwrap();
    let planted: Vec<(i64, i64)> = requests
        .iter()
        .filter(|r| r.url.path() == "/api/v1/Servers/create")
        .map(|r| {
            let b = body(r);
            (b["role"].as_i64().unwrap(), b["diskSize"].as_i64().unwrap())
        })
        .collect();
    assert_eq!(
        planted,
        vec![
            (i64::from(ServerRole::Bastion.code()), 32_212_254_720),
            (i64::from(ServerRole::Kubemaster.code()), 32_212_254_720),
        ]
    );
    let mutations: Vec<String> = calls(&server)
        .await
        .into_iter()
        .filter(|c| !c.starts_with("GET"))
        .collect();
    assert_eq!(
        mutations,
        vec![
            "POST /Projects/create",
            "POST /Servers/create",
            "POST /Servers/create",
            "POST /Projects/commit/14",
        ]
    );
}

#[tokio::test]
async fn delete_waits_until_project_is_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(page(json!([{"id": 14, "name": "prod", "cloudCredentialId": 3, "status": "Ready"}])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(page(json!([{"id": 14, "name": "prod", "cloudCredentialId": 3, "status": "Deleting"}])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(empty_page())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/Projects/delete"))
        .and(body_json(json!({"projectId": 14, "deleteAll": true})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Projects::new(platform(&server)).delete("14").await.unwrap();
    let polls = calls(&server)
        .await
        .into_iter()
        .filter(|c| c == "GET /Projects/list")
        .count();
    assert_eq!(polls, 4);
}

#[tokio::test]
async fn deleting_a_missing_project_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/Projects/list"))
        .respond_with(empty_page())
        .mount(&server)
        .await;

    Projects::new(platform(&server)).delete("14").await.unwrap();
    assert_eq!(calls(&server).await, vec!["GET /Projects/list"]);
}
