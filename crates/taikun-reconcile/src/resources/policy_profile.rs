//! Policy (OPA Gatekeeper) profiles.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_docker_repo, validate_docker_tag, validate_name};
use taikun_core::{Error, Result, Validate};

use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

const RESOURCE: &str = "OpaProfiles";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyProfileSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub allowed_repos: BTreeSet<String>,
    #[serde(default)]
    pub forbidden_tags: BTreeSet<String>,
    #[serde(default)]
    pub ingress_whitelist: BTreeSet<String>,
    #[serde(default)]
    pub forbid_http_ingress: bool,
    #[serde(default)]
    pub forbid_node_port: bool,
    #[serde(default)]
    pub require_probe: bool,
    #[serde(default)]
    pub unique_ingress: bool,
    #[serde(default)]
    pub unique_service_selector: bool,
}

impl Validate for PolicyProfileSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        for repo in &self.allowed_repos {
            validate_docker_repo("allowed_repos", repo)?;
        }
        for tag in &self.forbidden_tags {
            validate_docker_tag("forbidden_tags", tag)?;
        }
        for host in &self.ingress_whitelist {
            require_non_empty("ingress_whitelist", host)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyProfileComputed {
    pub organization_name: String,
    pub is_default: bool,
    pub project_ids: Vec<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    id: i32,
    name: String,
    #[serde(default)]
    organization_id: Option<i32>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    allowed_repo: Vec<String>,
    #[serde(default)]
    forbid_specific_tags: Vec<String>,
    #[serde(default)]
    ingress_whitelist: Vec<String>,
    #[serde(default)]
    forbid_http_ingress: bool,
    #[serde(default)]
    forbid_node_port: bool,
    #[serde(default)]
    require_probe: bool,
    #[serde(default)]
    unique_ingresses: bool,
    #[serde(default)]
    unique_service_selector: bool,
    #[serde(default)]
    projects: Vec<ProjectRef>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectRef {
    id: i32,
}

/// Body shared by create and update; `id` is set only for update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    allowed_repo: &'a BTreeSet<String>,
    forbid_specific_tags: &'a BTreeSet<String>,
    ingress_whitelist: &'a BTreeSet<String>,
    forbid_http_ingress: bool,
    forbid_node_port: bool,
    require_probe: bool,
    unique_ingresses: bool,
    unique_service_selector: bool,
}

impl<'a> Body<'a> {
    fn new(id: Option<i32>, spec: &'a PolicyProfileSpec) -> Result<Self> {
        Ok(Self {
            id,
            name: &spec.name,
            organization_id: parse_optional_id(spec.organization_id.as_deref())?,
            allowed_repo: &spec.allowed_repos,
            forbid_specific_tags: &spec.forbidden_tags,
            ingress_whitelist: &spec.ingress_whitelist,
            forbid_http_ingress: spec.forbid_http_ingress,
            forbid_node_port: spec.forbid_node_port,
            require_probe: spec.require_probe,
            unique_ingresses: spec.unique_ingress,
            unique_service_selector: spec.unique_service_selector,
        })
    }
}

fn observe(row: Row) -> Observed<PolicyProfileSpec, PolicyProfileComputed> {
    let spec = PolicyProfileSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        allowed_repos: row.allowed_repo.into_iter().collect(),
        forbidden_tags: row.forbid_specific_tags.into_iter().collect(),
        ingress_whitelist: row.ingress_whitelist.into_iter().collect(),
        forbid_http_ingress: row.forbid_http_ingress,
        forbid_node_port: row.forbid_node_port,
        require_probe: row.require_probe,
        unique_ingress: row.unique_ingresses,
        unique_service_selector: row.unique_service_selector,
    };
    let computed = PolicyProfileComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        is_default: row.is_default,
        project_ids: row.projects.iter().map(|p| p.id.to_string()).collect(),
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

pub struct PolicyProfiles {
    platform: Platform,
}

impl PolicyProfiles {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/OpaProfiles/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }
}

#[async_trait]
impl LockTarget for PolicyProfiles {
    fn lock_kind(&self) -> &'static str {
        Self::KIND
    }

    async fn observed_lock(&self, id: i32) -> Result<bool> {
        Ok(self.fetch(id, false).await?.is_locked)
    }

    async fn set_lock(&self, id: i32, locked: bool) -> Result<()> {
        self.platform.set_lock(RESOURCE, id, locked).await
    }
}

#[async_trait]
impl Reconciler for PolicyProfiles {
    type Spec = PolicyProfileSpec;
    type Computed = PolicyProfileComputed;

    const KIND: &'static str = "policy profile";

    async fn create(&self, desired: &PolicyProfileSpec) -> Result<Observed<PolicyProfileSpec, PolicyProfileComputed>> {
        desired.validate()?;
        let created: Created = self
            .platform
            .client()
            .post("/OpaProfiles/create", &Body::new(None, desired)?)
            .await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<PolicyProfileSpec, PolicyProfileComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &PolicyProfileSpec,
    ) -> Result<Observed<PolicyProfileSpec, PolicyProfileComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        let mut normalised = desired.clone();
        normalised.lock = current.lock;
        normalised.organization_id.clone_from(&current.organization_id);
        let has_changes = normalised != current;

        mediate(self, &self.platform, id, desired.lock, has_changes, || async {
            let body = Body::new(Some(id), &normalised)?;
            self.platform.client().put_unit("/OpaProfiles/update", &body).await
        })
        .await?;
        self.platform
            .read_after(Operation::Update, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        if !release_for_delete(self, &self.platform, id).await? {
            return Ok(());
        }
        self.platform
            .delete_ignoring_missing(&format!("/OpaProfiles/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn invalid_repo_and_tag_are_rejected() {
        let mut spec = PolicyProfileSpec {
            name: "strict".into(),
            ..PolicyProfileSpec::default()
        };
        spec.allowed_repos.insert("Bad Repo!".into());
        assert!(spec.validate().is_err());

        spec.allowed_repos = BTreeSet::from(["docker.io/library/nginx".to_string()]);
        spec.forbidden_tags.insert("latest".into());
        spec.validate().unwrap();
        spec.forbidden_tags.insert(".hidden".into());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn update_body_carries_id_and_platform_names() {
        let spec = PolicyProfileSpec {
            name: "strict".into(),
            unique_ingress: true,
            forbidden_tags: BTreeSet::from(["latest".to_string()]),
            ..PolicyProfileSpec::default()
        };
        let body = serde_json::to_value(Body::new(Some(9), &spec).unwrap()).unwrap();
        assert_eq!(body["id"], json!(9));
        assert_eq!(body["uniqueIngresses"], json!(true));
        assert_eq!(body["forbidSpecificTags"], json!(["latest"]));
    }
}
