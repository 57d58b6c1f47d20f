//! Kubernetes profiles: cluster-wide settings chosen when a project is
//! created. Every field except the lock is fixed once the profile exists.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::convert::LoadBalancingSolution;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::validate_name;
use taikun_core::{Error, Result, Validate};

use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

const RESOURCE: &str = "KubernetesProfiles";

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesProfileSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub load_balancing_solution: LoadBalancingSolution,
    #[serde(default)]
    pub schedule_on_master: bool,
    #[serde(default)]
    pub bastion_proxy: bool,
    #[serde(default)]
    pub nvidia_gpu_operator: bool,
    #[serde(default = "default_true")]
    pub unique_cluster_name: bool,
}

impl Default for KubernetesProfileSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            organization_id: None,
            lock: false,
            load_balancing_solution: LoadBalancingSolution::None,
            schedule_on_master: false,
            bastion_proxy: false,
            nvidia_gpu_operator: false,
            unique_cluster_name: true,
        }
    }
}

impl Validate for KubernetesProfileSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KubernetesProfileComputed {
    pub organization_name: String,
    pub cni: String,
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
    octavia_enabled: bool,
    #[serde(default, rename = "taikunLBEnabled")]
    taikun_lb_enabled: bool,
    #[serde(default)]
    allow_scheduling_on_master: bool,
    #[serde(default)]
    expose_node_port_on_bastion: bool,
    #[serde(default)]
    nvidia_gpu_operator_enabled: bool,
    #[serde(default)]
    unique_cluster_name: bool,
    #[serde(default)]
    cni: Option<String>,
    #[serde(default)]
    projects: Vec<ProjectRef>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectRef {
    id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    octavia_enabled: bool,
    #[serde(rename = "taikunLBEnabled")]
    taikun_lb_enabled: bool,
    allow_scheduling_on_master: bool,
    expose_node_port_on_bastion: bool,
    nvidia_gpu_operator_enabled: bool,
    unique_cluster_name: bool,
}

fn observe(row: Row) -> Observed<KubernetesProfileSpec, KubernetesProfileComputed> {
    let spec = KubernetesProfileSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        load_balancing_solution: LoadBalancingSolution::from_flags(row.octavia_enabled, row.taikun_lb_enabled),
        schedule_on_master: row.allow_scheduling_on_master,
        bastion_proxy: row.expose_node_port_on_bastion,
        nvidia_gpu_operator: row.nvidia_gpu_operator_enabled,
        unique_cluster_name: row.unique_cluster_name,
    };
    let computed = KubernetesProfileComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        cni: row.cni.unwrap_or_default(),
        project_ids: row.projects.iter().map(|p| p.id.to_string()).collect(),
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

pub struct KubernetesProfiles {
    platform: Platform,
}

impl KubernetesProfiles {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/KubernetesProfiles/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }
}

/// First immutable field that differs, if any.
fn immutable_change(current: &KubernetesProfileSpec, desired: &KubernetesProfileSpec) -> Option<&'static str> {
    if current.name != desired.name {
        Some("name")
    } else if desired.organization_id.is_some() && current.organization_id != desired.organization_id {
        Some("organization_id")
    } else if current.load_balancing_solution != desired.load_balancing_solution {
        Some("load_balancing_solution")
    } else if current.schedule_on_master != desired.schedule_on_master {
        Some("schedule_on_master")
    } else if current.bastion_proxy != desired.bastion_proxy {
        Some("bastion_proxy")
    } else if current.nvidia_gpu_operator != desired.nvidia_gpu_operator {
        Some("nvidia_gpu_operator")
    } else if current.unique_cluster_name != desired.unique_cluster_name {
        Some("unique_cluster_name")
    } else {
        None
    }
}

#[async_trait]
impl LockTarget for KubernetesProfiles {
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
impl Reconciler for KubernetesProfiles {
    type Spec = KubernetesProfileSpec;
    type Computed = KubernetesProfileComputed;

    const KIND: &'static str = "kubernetes profile";

    async fn create(
        &self,
        desired: &KubernetesProfileSpec,
    ) -> Result<Observed<KubernetesProfileSpec, KubernetesProfileComputed>> {
        desired.validate()?;
        let (octavia_enabled, taikun_lb_enabled) = desired.load_balancing_solution.to_flags();
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            octavia_enabled,
            taikun_lb_enabled,
            allow_scheduling_on_master: desired.schedule_on_master,
            expose_node_port_on_bastion: desired.bastion_proxy,
            nvidia_gpu_operator_enabled: desired.nvidia_gpu_operator,
            unique_cluster_name: desired.unique_cluster_name,
        };
        let created: Created = self.platform.client().post("/KubernetesProfiles/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<KubernetesProfileSpec, KubernetesProfileComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &KubernetesProfileSpec,
    ) -> Result<Observed<KubernetesProfileSpec, KubernetesProfileComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        if let Some(field) = immutable_change(&current, desired) {
            return Err(Error::validation(field, "cannot change after creation"));
        }
        mediate(self, &self.platform, id, desired.lock, false, || async { Ok(()) }).await?;
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
            .delete_ignoring_missing(&format!("/KubernetesProfiles/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
