//! Project orchestrator.
//!
//! A project is a shell (cloud credential, profiles, services) plus either a
//! Kubernetes topology (one bastion, an odd number of masters, any number of
//! workers) or a set of standalone VMs. Creating one walks
//! `shell → quota → images → servers → commit → Ready`; updates adjust
//! bindings, quota, expiration, workers and services in place under the lock
//! mediator; deletion waits for the project to disappear.

mod bindings;
pub mod model;
mod servers;
mod services;
mod wire;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use taikun_client::Created;
use taikun_core::convert::{bytes_to_gibi, date_to_rfc3339, gibi_to_bytes, rfc3339_to_date};
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::{Error, Result, Validate};

use crate::binding::{Binder, reconcile_bindings};
use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Observed, Reconciler};
use crate::wait::Operation;

pub use model::{ProjectComputed, ProjectSpec, ServerRole, ServerSpec, ServerState, VmSpec};

use bindings::{ProjectFlavors, ProjectImages, ProjectMembers};
use wire::{
    CreateProjectBody, DeleteProjectBody, ExtendLifetimeBody, ProjectRow, QuotaRow, QuotaUpdateBody, ServerRow,
    VmRow,
};

const RESOURCE: &str = "Projects";

/// Statuses seen while a project is being torn down.
const DELETING: &[&str] = &["Deleting", "PendingDelete"];

async fn fetch_row(platform: &Platform, id: i32, after_op: bool) -> Result<ProjectRow> {
    let rows: Vec<ProjectRow> = platform.list_by_id("/Projects/list", id).await?;
    expect_one(rows, Projects::KIND, &id.to_string(), after_op, |r| r.id == id)
}

/// The project's quota row. The platform keeps exactly one per project.
async fn fetch_quota(platform: &Platform, quota_id: i32) -> Result<QuotaRow> {
    let rows: Vec<QuotaRow> = platform.list_by_id("/ProjectQuotas/list", quota_id).await?;
    let mut matching = rows.into_iter().filter(|q| q.id == quota_id);
    match (matching.next(), matching.next()) {
        (Some(quota), None) => Ok(quota),
        (None, _) => Err(Error::Inconsistent(format!("quota {quota_id} not listed"))),
        (Some(_), Some(_)) => Err(Error::Inconsistent(format!("quota {quota_id} listed more than once"))),
    }
}

/// Everything a read gathers about one project.
struct ProjectState {
    row: ProjectRow,
    servers: Vec<ServerRow>,
    vms: Vec<VmRow>,
    flavors: BTreeSet<String>,
    images: BTreeSet<String>,
    quota: Option<QuotaRow>,
}

fn observe(state: &ProjectState) -> Result<Observed<ProjectSpec, ProjectComputed>> {
    let row = &state.row;
    let mut spec = ProjectSpec {
        name: row.name.clone(),
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        cloud_credential_id: row.cloud_credential_id.to_string(),
        access_profile_id: row.access_profile_id.map(|p| p.to_string()),
        alerting_profile_id: row.alerting_profile_id.map(|p| p.to_string()),
        kubernetes_profile_id: row.kubernetes_profile_id.map(|p| p.to_string()),
        kubernetes_version: row.kubernetes_current_version.clone().filter(|v| !v.is_empty()),
        expiration_date: row.expired_at.as_deref().map(rfc3339_to_date).transpose()?,
        auto_upgrade: row.is_auto_upgrade,
        monitoring: row.is_monitoring_enabled,
        backup_credential_id: row.active_backup().map(|c| c.to_string()),
        policy_profile_id: row.active_policy().map(|p| p.to_string()),
        flavors: state.flavors.clone(),
        images: state.images.clone(),
        users: Some(row.bound_users.iter().map(|u| u.user_id.clone()).collect()),
        quota_cpu_units: state.quota.as_ref().map(|q| q.server_cpu),
        quota_ram_size: state.quota.as_ref().map(|q| bytes_to_gibi(q.server_ram)),
        quota_disk_size: state.quota.as_ref().map(|q| bytes_to_gibi(q.server_disk_size)),
        ..ProjectSpec::default()
    };

    let mut servers = Vec::with_capacity(state.servers.len());
    let mut access_ip = None;
    for s in &state.servers {
        let role = ServerRole::from_platform(&s.role)?;
        let member = ServerSpec {
            name: s.name.clone(),
            flavor: s.flavor.clone(),
            disk_size: bytes_to_gibi(s.disk_size),
            kubernetes_node_label: s.kubernetes_node_labels.iter().cloned().collect(),
        };
        match role {
            ServerRole::Bastion => {
                access_ip.clone_from(&s.ip_address);
                spec.server_bastion.insert(member);
            }
            ServerRole::Kubemaster => {
                spec.server_kubemaster.insert(member);
            }
            ServerRole::Kubeworker => {
                spec.server_kubeworker.insert(member);
            }
        }
        servers.push(ServerState {
            id: s.id.to_string(),
            name: s.name.clone(),
            role: Some(role),
            ip_address: s.ip_address.clone().unwrap_or_default(),
            status: s.status.clone(),
        });
    }
    for v in &state.vms {
        spec.vm.insert(VmSpec {
            name: v.name.clone(),
            flavor: v.flavor_name.clone(),
            image_id: v.image_id.clone(),
            standalone_profile_id: v.standalone_profile_id.to_string(),
            volume_size: v.volume_size,
            public_ip: v.public_ip_enabled,
        });
        servers.push(ServerState {
            id: v.id.to_string(),
            name: v.name.clone(),
            role: None,
            ip_address: v.ip_address.clone().unwrap_or_default(),
            status: v.status.clone(),
        });
    }

    let computed = ProjectComputed {
        status: row.status.clone(),
        health: row.health.clone().unwrap_or_default(),
        cloud_type: row.cloud_type.clone().unwrap_or_default(),
        organization_name: row.organization_name.clone().unwrap_or_default(),
        quota_id: row.quota_id.map(|q| q.to_string()),
        access_ip,
        servers,
        audit: row.audit.clone(),
    };
    Ok(Observed::new(row.id, spec, computed))
}

fn optional_id(path: &str, raw: Option<&String>) -> Result<Option<i32>> {
    parse_optional_id(raw.map(String::as_str)).map_err(|e| Error::validation(path, e.to_string()))
}

#[derive(Clone)]
pub struct Projects {
    platform: Platform,
}

impl Projects {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn gather(&self, id: i32, after_op: bool) -> Result<ProjectState> {
        let row = fetch_row(&self.platform, id, after_op).await?;
        let servers = servers::list_servers(&self.platform, id).await?;
        let vms = servers::list_vms(&self.platform, id).await?;
        let flavors = ProjectFlavors {
            platform: &self.platform,
            project: id,
        }
        .observed()
        .await?;
        let images = ProjectImages {
            platform: &self.platform,
            project: id,
        }
        .observed()
        .await?;
        let quota = match row.quota_id {
            Some(q) => Some(fetch_quota(&self.platform, q).await?),
            None => None,
        };
        Ok(ProjectState {
            row,
            servers,
            vms,
            flavors: flavors.into_iter().map(|b| b.member).collect(),
            images: images.into_iter().map(|b| b.member).collect(),
            quota,
        })
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Observed<ProjectSpec, ProjectComputed>> {
        observe(&self.gather(id, after_op).await?)
    }

    /// Observed state once the project is visible again after `op`.
    async fn read_back(&self, op: Operation, id: i32) -> Result<Observed<ProjectSpec, ProjectComputed>> {
        let projects = self.clone();
        self.platform
            .read_after(op, move || {
                let projects = projects.clone();
                async move { projects.fetch(id, true).await }
            })
            .await
    }

    async fn reconcile_quota(&self, row: &ProjectRow, desired: &ProjectSpec) -> Result<()> {
        if desired.quota_cpu_units.is_none() && desired.quota_ram_size.is_none() && desired.quota_disk_size.is_none() {
            return Ok(());
        }
        let quota_id = row
            .quota_id
            .ok_or_else(|| Error::Inconsistent(format!("project {} has no quota", row.id)))?;
        let current = fetch_quota(&self.platform, quota_id).await?;
        let body = QuotaUpdateBody {
            quota_id,
            server_cpu: desired.quota_cpu_units.unwrap_or(current.server_cpu),
            server_ram: desired.quota_ram_size.map_or(current.server_ram, gibi_to_bytes),
            server_disk_size: desired.quota_disk_size.map_or(current.server_disk_size, gibi_to_bytes),
        };
        if body.server_cpu == current.server_cpu
            && body.server_ram == current.server_ram
            && body.server_disk_size == current.server_disk_size
        {
            return Ok(());
        }
        info!(project = row.id, quota_id, "Updating quota");
        self.platform.client().put_unit("/ProjectQuotas/update", &body).await
    }

    async fn reconcile_relations(&self, row: &ProjectRow, desired: &ProjectSpec) -> Result<()> {
        let project = row.id;
        let flavors = ProjectFlavors {
            platform: &self.platform,
            project,
        };
        reconcile_bindings(&flavors, &desired.flavors).await?;
        let images = ProjectImages {
            platform: &self.platform,
            project,
        };
        reconcile_bindings(&images, &desired.images).await?;
        if let Some(users) = &desired.users {
            let members = ProjectMembers {
                platform: &self.platform,
                project,
                observed: row.bound_users.iter().map(|u| u.user_id.clone()).collect(),
            };
            reconcile_bindings(&members, users).await?;
        }
        Ok(())
    }

    /// Plant, remove and commit; returns once the project is `Ready` again.
    async fn reconcile_topology(&self, state: &ProjectState, current: &ProjectSpec, desired: &ProjectSpec) -> Result<()> {
        let project = state.row.id;

        let desired_workers: BTreeSet<&str> = desired.server_kubeworker.iter().map(|s| s.name.as_str()).collect();
        let current_workers: BTreeSet<&str> = current.server_kubeworker.iter().map(|s| s.name.as_str()).collect();
        let doomed: Vec<i32> = state
            .servers
            .iter()
            .filter(|s| current_workers.contains(s.name.as_str()) && !desired_workers.contains(s.name.as_str()))
            .map(|s| s.id)
            .collect();
        servers::delete_servers(&self.platform, project, &doomed).await?;
        let added: Vec<&ServerSpec> = desired
            .server_kubeworker
            .iter()
            .filter(|s| !current_workers.contains(s.name.as_str()))
            .collect();
        servers::plant_servers(&self.platform, project, ServerRole::Kubeworker, added.clone()).await?;
        let changed = !doomed.is_empty() || !added.is_empty();

        let desired_vms: BTreeSet<&str> = desired.vm.iter().map(|v| v.name.as_str()).collect();
        let current_vms: BTreeSet<&str> = current.vm.iter().map(|v| v.name.as_str()).collect();
        let doomed_vms: Vec<i32> = state
            .vms
            .iter()
            .filter(|v| !desired_vms.contains(v.name.as_str()))
            .map(|v| v.id)
            .collect();
        servers::delete_vms(&self.platform, project, &doomed_vms).await?;
        let added_vms: Vec<&VmSpec> = desired
            .vm
            .iter()
            .filter(|v| !current_vms.contains(v.name.as_str()))
            .collect();
        servers::plant_vms(&self.platform, project, added_vms.clone()).await?;
        let vms_changed = !doomed_vms.is_empty() || !added_vms.is_empty();

        if changed {
            servers::commit(&self.platform, project, false).await?;
        }
        if vms_changed {
            servers::commit(&self.platform, project, true).await?;
        }
        if changed || vms_changed {
            services::wait_ready(&self.platform, project, self.platform.policy().provisioning).await?;
        }
        Ok(())
    }

    async fn apply(&self, state: &ProjectState, current: &ProjectSpec, desired: &ProjectSpec) -> Result<()> {
        let row = &state.row;
        self.reconcile_relations(row, desired).await?;
        self.reconcile_quota(row, desired).await?;

        if desired.expiration_date != current.expiration_date {
            let body = ExtendLifetimeBody {
                project_id: row.id,
                expire_at: desired.expiration_date.as_deref().map(date_to_rfc3339).transpose()?,
            };
            info!(project = row.id, expire_at = ?body.expire_at, "Changing expiration");
            self.platform.client().post_unit("/Projects/extendlifetime", &body).await?;
        }
        services::reconcile_alerting(
            &self.platform,
            row.id,
            row.alerting_profile_id,
            optional_id("alerting_profile_id", desired.alerting_profile_id.as_ref())?,
        )
        .await?;

        self.reconcile_topology(state, current, desired).await?;

        services::reconcile_monitoring(&self.platform, row.id, row.is_monitoring_enabled, desired.monitoring).await?;
        services::reconcile_backup(
            &self.platform,
            row.id,
            row.active_backup(),
            optional_id("backup_credential_id", desired.backup_credential_id.as_ref())?,
        )
        .await?;
        services::reconcile_policy(
            &self.platform,
            row.id,
            row.active_policy(),
            optional_id("policy_profile_id", desired.policy_profile_id.as_ref())?,
        )
        .await
    }
}

#[async_trait]
impl LockTarget for Projects {
    fn lock_kind(&self) -> &'static str {
        Self::KIND
    }

    async fn observed_lock(&self, id: i32) -> Result<bool> {
        Ok(fetch_row(&self.platform, id, false).await?.is_locked)
    }

    async fn set_lock(&self, id: i32, locked: bool) -> Result<()> {
        self.platform.set_lock(RESOURCE, id, locked).await
    }
}

#[async_trait]
impl Reconciler for Projects {
    type Spec = ProjectSpec;
    type Computed = ProjectComputed;

    const KIND: &'static str = "project";

    async fn create(&self, desired: &ProjectSpec) -> Result<Observed<ProjectSpec, ProjectComputed>> {
        desired.validate()?;
        let backup = optional_id("backup_credential_id", desired.backup_credential_id.as_ref())?;
        let policy = optional_id("policy_profile_id", desired.policy_profile_id.as_ref())?;
        let body = CreateProjectBody {
            name: &desired.name,
            cloud_credential_id: parse_entity_id(&desired.cloud_credential_id)?,
            organization_id: optional_id("organization_id", desired.organization_id.as_ref())?,
            access_profile_id: optional_id("access_profile_id", desired.access_profile_id.as_ref())?,
            alerting_profile_id: optional_id("alerting_profile_id", desired.alerting_profile_id.as_ref())?,
            kubernetes_profile_id: optional_id("kubernetes_profile_id", desired.kubernetes_profile_id.as_ref())?,
            kubernetes_version: desired.kubernetes_version.as_deref(),
            expired_at: desired.expiration_date.as_deref().map(date_to_rfc3339).transpose()?,
            is_auto_upgrade: desired.auto_upgrade,
            is_monitoring_enabled: desired.monitoring,
            is_backup_enabled: backup.is_some(),
            backup_credential_id: backup,
            is_opa_enabled: policy.is_some(),
            opa_profile_id: policy,
            flavors: desired.flavors.iter().map(String::as_str).collect(),
            is_kubernetes: desired.vm.is_empty(),
        };
        let created: Created = self.platform.client().post("/Projects/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, name = %desired.name, "Created shell");

        let poller = self.platform.clone();
        let row = self
            .platform
            .read_after(Operation::Create, move || {
                let platform = poller.clone();
                async move { fetch_row(&platform, id, true).await }
            })
            .await?;
        self.reconcile_quota(&row, desired).await?;
        self.reconcile_relations(&row, desired).await?;

        if desired.has_servers() {
            for role in ServerRole::ALL {
                servers::plant_servers(&self.platform, id, role, desired.servers(role)).await?;
            }
            servers::commit(&self.platform, id, false).await?;
            services::wait_ready(&self.platform, id, self.platform.policy().provisioning).await?;
        } else if !desired.vm.is_empty() {
            servers::plant_vms(&self.platform, id, &desired.vm).await?;
            servers::commit(&self.platform, id, true).await?;
            services::wait_ready(&self.platform, id, self.platform.policy().provisioning).await?;
        }

        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.read_back(Operation::Create, id).await
    }

    async fn read(&self, id: &str) -> Result<Observed<ProjectSpec, ProjectComputed>> {
        self.fetch(parse_entity_id(id)?, false).await
    }

    async fn update(&self, id: &str, desired: &ProjectSpec) -> Result<Observed<ProjectSpec, ProjectComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let state = self.gather(id, false).await?;
        let current = observe(&state)?.spec;
        if let Some(field) = desired.immutable_change(&current) {
            return Err(Error::validation(field, "cannot change after creation"));
        }
        let has_changes = desired.normalised_against(&current) != current;
        let projects = self.clone();
        let target = desired.clone();
        mediate(self, &self.platform, id, desired.lock, has_changes, move || async move {
            projects.apply(&state, &current, &target).await
        })
        .await?;
        self.read_back(Operation::Update, id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        if !release_for_delete(self, &self.platform, id).await? {
            return Ok(());
        }
        let body = DeleteProjectBody {
            project_id: id,
            delete_all: true,
        };
        self.platform.client().post_unit("/Projects/delete", &body).await?;
        info!(kind = Self::KIND, id, "Deletion requested");
        let poller = self.platform.clone();
        self.platform
            .wait_gone(
                format!("project {id}"),
                DELETING,
                self.platform.policy().provisioning,
                move || {
                    let platform = poller.clone();
                    async move {
                        match fetch_row(&platform, id, false).await {
                            Ok(row) => Ok(Some(row.status)),
                            Err(e) if e.is_not_found() => Ok(None),
                            Err(e) => Err(e),
                        }
                    }
                },
            )
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
    use crate::binding::Label;

    fn state() -> ProjectState {
        let row: ProjectRow = serde_json::from_value(json!({
            "id": 14,
            "name": "prod",
            "organizationId": 2,
            "cloudCredentialId": 3,
            "cloudType": "AWS",
            "kubernetesCurrentVersion": "v1.29.1",
            "expiredAt": "2027-01-31T00:00:00Z",
            "isMonitoringEnabled": true,
            "isBackupEnabled": false,
            "s3CredentialId": 9,
            "isOpaEnabled": true,
            "opaProfileId": 5,
            "isLocked": true,
            "status": "Ready",
            "quotaId": 77,
            "boundUsers": [{"userId": "u-1"}]
        }))
        .unwrap();
        let servers: Vec<ServerRow> = serde_json::from_value(json!([
            {"id": 1, "name": "b", "role": 100, "flavor": "m5.large", "diskSize": 32_212_254_720_i64, "ipAddress": "1.2.3.4", "status": "Ready"},
            {"id": 2, "name": "m1", "role": "Kubemaster", "flavor": "m5.large", "diskSize": 32_212_254_720_i64, "status": "Ready"},
            {"id": 3, "name": "w1", "role": 300, "flavor": "m5.large", "diskSize": 64_424_509_440_i64, "status": "Ready",
             "kubernetesNodeLabels": [{"key": "tier", "value": "web"}]}
        ]))
        .unwrap();
        let quota: QuotaRow = serde_json::from_value(json!({
            "id": 77, "serverCpu": 64, "serverRam": 137_438_953_472_i64, "serverDiskSize": 1_099_511_627_776_i64
        }))
        .unwrap();
        ProjectState {
            row,
            servers,
            vms: Vec::new(),
            flavors: ["m5.large".to_string()].into(),
            images: BTreeSet::new(),
            quota: Some(quota),
        }
    }

    #[test]
    fn observes_topology_by_role() {
        let observed = observe(&state()).unwrap();
        let spec = &observed.spec;
        assert_eq!(observed.id, "14");
        assert_eq!(spec.server_bastion.len(), 1);
        assert_eq!(spec.server_kubemaster.len(), 1);
        let worker = spec.server_kubeworker.iter().next().unwrap();
        assert_eq!(worker.disk_size, 60);
        assert!(worker.kubernetes_node_label.contains(&Label::new("tier", "web")));
        assert_eq!(observed.computed.access_ip.as_deref(), Some("1.2.3.4"));
        spec.validate().unwrap();
    }

    #[test]
    fn translates_dates_quota_and_service_flags() {
        let spec = observe(&state()).unwrap().spec;
        assert_eq!(spec.expiration_date.as_deref(), Some("31/01/2027"));
        assert_eq!(spec.quota_cpu_units, Some(64));
        assert_eq!(spec.quota_ram_size, Some(128));
        assert_eq!(spec.quota_disk_size, Some(1024));
        // Backup is off, so its remembered credential is not reported.
        assert_eq!(spec.backup_credential_id, None);
        assert_eq!(spec.policy_profile_id.as_deref(), Some("5"));
        assert!(spec.monitoring);
        assert!(spec.lock);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn update_work_can_move_across_threads() {
        use std::time::Duration;

        use taikun_client::ApiClient;
        use taikun_core::config::{ApiConfig, AuthBackend, Credentials};

        let api = ApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..ApiConfig::default()
        };
        let creds = Credentials {
            email: "e".into(),
            password: "p".into(),
            backend: AuthBackend::Default,
        };
        let platform = Platform::new(ApiClient::new(&api, creds).unwrap(), crate::wait::WaitPolicy::default());
        let projects = Projects::new(platform.clone());
        let state = state();
        let current = observe(&state).unwrap().spec;
        let desired = current.clone();

        assert_send(&projects.apply(&state, &current, &desired));
        assert_send(&services::wait_ready(&platform, 14, Duration::from_secs(1)));
        assert_send(&services::reconcile_backup(&platform, 14, Some(1), Some(2)));
        assert_send(&release_for_delete(&projects, &platform, 14));
    }

    #[test]
    fn create_body_enables_services_from_ids() {
        let body = CreateProjectBody {
            name: "prod",
            cloud_credential_id: 3,
            organization_id: None,
            access_profile_id: None,
            alerting_profile_id: None,
            kubernetes_profile_id: None,
            kubernetes_version: None,
            expired_at: Some(date_to_rfc3339("31/01/2027").unwrap()),
            is_auto_upgrade: false,
            is_monitoring_enabled: false,
            is_backup_enabled: true,
            backup_credential_id: Some(9),
            is_opa_enabled: false,
            opa_profile_id: None,
            flavors: vec!["m5.large"],
            is_kubernetes: true,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["s3CredentialId"], json!(9));
        assert_eq!(v["expiredAt"], json!("2027-01-31T00:00:00Z"));
        assert!(v.get("opaProfileId").is_none());
    }
}
