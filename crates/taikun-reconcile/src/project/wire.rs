//! Platform rows and request bodies for projects and their servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::Label;
use crate::reconciler::Audit;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProjectRow {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<i32>,
    #[serde(default)]
    pub organization_name: Option<String>,
    pub cloud_credential_id: i32,
    #[serde(default)]
    pub cloud_type: Option<String>,
    #[serde(default)]
    pub access_profile_id: Option<i32>,
    #[serde(default)]
    pub alerting_profile_id: Option<i32>,
    #[serde(default)]
    pub kubernetes_profile_id: Option<i32>,
    #[serde(default)]
    pub kubernetes_current_version: Option<String>,
    #[serde(default)]
    pub expired_at: Option<String>,
    #[serde(default)]
    pub is_auto_upgrade: bool,
    #[serde(default)]
    pub is_monitoring_enabled: bool,
    #[serde(default)]
    pub is_backup_enabled: bool,
    #[serde(default, rename = "s3CredentialId")]
    pub backup_credential_id: Option<i32>,
    #[serde(default)]
    pub is_opa_enabled: bool,
    #[serde(default)]
    pub opa_profile_id: Option<i32>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub quota_id: Option<i32>,
    #[serde(default)]
    pub bound_users: Vec<BoundUser>,
    #[serde(flatten)]
    pub audit: Audit,
}

impl ProjectRow {
    /// Backup credential while backups are on.
    pub fn active_backup(&self) -> Option<i32> {
        self.backup_credential_id.filter(|_| self.is_backup_enabled)
    }

    /// Policy profile while the gatekeeper is on.
    pub fn active_policy(&self) -> Option<i32> {
        self.opa_profile_id.filter(|_| self.is_opa_enabled)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BoundUser {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ServerRow {
    pub id: i32,
    pub name: String,
    pub role: Value,
    #[serde(default)]
    pub flavor: String,
    /// Bytes.
    #[serde(default)]
    pub disk_size: i64,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub kubernetes_node_labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VmRow {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub flavor_name: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default, rename = "standAloneProfileId")]
    pub standalone_profile_id: i32,
    /// Gibibytes.
    #[serde(default)]
    pub volume_size: i64,
    #[serde(default)]
    pub public_ip_enabled: bool,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct QuotaRow {
    pub id: i32,
    #[serde(default)]
    pub server_cpu: i64,
    /// Bytes.
    #[serde(default)]
    pub server_ram: i64,
    /// Bytes.
    #[serde(default)]
    pub server_disk_size: i64,
}

/// A flavor bound to a project; unbound by the binding's own id.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct BoundFlavorRow {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BoundImageRow {
    pub id: i32,
    pub image_id: String,
}

// =========================================================================
// Bodies
// =========================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateProjectBody<'a> {
    pub name: &'a str,
    pub cloud_credential_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_profile_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerting_profile_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_profile_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<String>,
    pub is_auto_upgrade: bool,
    pub is_monitoring_enabled: bool,
    pub is_backup_enabled: bool,
    #[serde(rename = "s3CredentialId", skip_serializing_if = "Option::is_none")]
    pub backup_credential_id: Option<i32>,
    pub is_opa_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opa_profile_id: Option<i32>,
    pub flavors: Vec<&'a str>,
    pub is_kubernetes: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct QuotaUpdateBody {
    pub quota_id: i32,
    pub server_cpu: i64,
    pub server_ram: i64,
    pub server_disk_size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateServerBody<'a> {
    pub project_id: i32,
    pub name: &'a str,
    pub flavor: &'a str,
    /// Bytes.
    pub disk_size: i64,
    pub role: i32,
    pub count: i32,
    pub kubernetes_node_labels: Vec<&'a Label>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteServersBody<'a> {
    pub project_id: i32,
    pub server_ids: &'a [i32],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateVmBody<'a> {
    pub project_id: i32,
    pub name: &'a str,
    pub flavor_name: &'a str,
    pub image_id: &'a str,
    #[serde(rename = "standAloneProfileId")]
    pub standalone_profile_id: i32,
    pub volume_size: i64,
    pub public_ip_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteVmsBody<'a> {
    pub project_id: i32,
    pub vm_ids: &'a [i32],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProjectIdBody {
    pub project_id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteProjectBody {
    pub project_id: i32,
    pub delete_all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ExtendLifetimeBody {
    pub project_id: i32,
    /// `None` removes the expiration.
    pub expire_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BackupBody {
    pub project_id: i32,
    #[serde(rename = "s3CredentialId")]
    pub backup_credential_id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GatekeeperBody {
    pub project_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opa_profile_id: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AlertingBody {
    pub project_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerting_profile_id: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BindFlavorsBody<'a> {
    pub project_id: i32,
    pub flavors: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BindImagesBody<'a> {
    pub project_id: i32,
    pub images: &'a [String],
}

/// Unbind by binding ids.
#[derive(Debug, Serialize)]
pub(super) struct UnbindBody {
    pub ids: Vec<i32>,
}
