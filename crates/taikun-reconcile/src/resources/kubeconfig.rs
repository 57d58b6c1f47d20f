//! Kubeconfigs issued for a project's cluster. Immutable once created; the
//! file itself is downloaded on every read.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use taikun_client::Created;
use taikun_core::id::parse_entity_id;
use taikun_core::validate::validate_name;
use taikun_core::{Error, Result, Validate};

use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KubeconfigRole {
    ClusterAdmin,
    Admin,
    Edit,
    #[default]
    View,
}

impl KubeconfigRole {
    const fn platform_id(self) -> i32 {
        match self {
            Self::ClusterAdmin => 1,
            Self::Admin => 2,
            Self::Edit => 3,
            Self::View => 4,
        }
    }
}

impl FromStr for KubeconfigRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cluster-admin" => Ok(Self::ClusterAdmin),
            "admin" => Ok(Self::Admin),
            "edit" => Ok(Self::Edit),
            "view" => Ok(Self::View),
            other => Err(Error::Inconsistent(format!("unknown kubeconfig role `{other}`"))),
        }
    }
}

impl fmt::Display for KubeconfigRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClusterAdmin => "cluster-admin",
            Self::Admin => "admin",
            Self::Edit => "edit",
            Self::View => "view",
        })
    }
}

/// Who may download the kubeconfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    #[default]
    Personal,
    Managers,
    All,
}

impl AccessScope {
    /// `(isAccessibleForAll, isAccessibleForManager)`.
    const fn to_flags(self) -> (bool, bool) {
        match self {
            Self::Personal => (false, false),
            Self::Managers => (false, true),
            Self::All => (true, false),
        }
    }

    const fn from_flags(all: bool, managers: bool) -> Self {
        match (all, managers) {
            (true, _) => Self::All,
            (false, true) => Self::Managers,
            (false, false) => Self::Personal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigSpec {
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub role: KubeconfigRole,
    #[serde(default)]
    pub access_scope: AccessScope,
    #[serde(default)]
    pub namespace: String,
    /// Minutes; unset means it never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_period: Option<i32>,
}

impl Validate for KubeconfigSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_entity_id(&self.project_id).map_err(|e| Error::validation("project_id", e.to_string()))?;
        if self.validity_period.is_some_and(|m| m < 1440) {
            return Err(Error::validation("validity_period", "must be at least 1440 minutes"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KubeconfigComputed {
    pub project_name: String,
    pub user_name: String,
    pub content: String,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    id: i32,
    #[serde(rename = "displayName")]
    name: String,
    project_id: i32,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default, rename = "kubeConfigRoleName")]
    role: String,
    #[serde(default)]
    is_accessible_for_all: bool,
    #[serde(default)]
    is_accessible_for_manager: bool,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    ttl: Option<i32>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    project_id: i32,
    kube_config_role_id: i32,
    is_accessible_for_all: bool,
    is_accessible_for_manager: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
    ttl: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadBody {
    project_id: i32,
    id: i32,
}

fn observe(row: Row, content: String) -> Result<Observed<KubeconfigSpec, KubeconfigComputed>> {
    let spec = KubeconfigSpec {
        name: row.name,
        project_id: row.project_id.to_string(),
        role: row.role.parse()?,
        access_scope: AccessScope::from_flags(row.is_accessible_for_all, row.is_accessible_for_manager),
        namespace: row.namespace.unwrap_or_default(),
        validity_period: row.ttl.filter(|t| *t > 0),
    };
    let computed = KubeconfigComputed {
        project_name: row.project_name.unwrap_or_default(),
        user_name: row.user_name.unwrap_or_default(),
        content,
        audit: row.audit,
    };
    Ok(Observed::new(row.id, spec, computed))
}

pub struct Kubeconfigs {
    platform: Platform,
}

impl Kubeconfigs {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Observed<KubeconfigSpec, KubeconfigComputed>> {
        let rows: Vec<Row> = self.platform.list_by_id("/KubeConfig/list", id).await?;
        let row = expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)?;
        let body = DownloadBody {
            project_id: row.project_id,
            id,
        };
        let content: String = self.platform.client().post("/KubeConfig/download", &body).await?;
        debug!(id, bytes = content.len(), "Downloaded kubeconfig");
        observe(row, content)
    }
}

#[async_trait]
impl Reconciler for Kubeconfigs {
    type Spec = KubeconfigSpec;
    type Computed = KubeconfigComputed;

    const KIND: &'static str = "kubeconfig";

    async fn create(&self, desired: &KubeconfigSpec) -> Result<Observed<KubeconfigSpec, KubeconfigComputed>> {
        desired.validate()?;
        let (all, managers) = desired.access_scope.to_flags();
        let body = CreateBody {
            name: &desired.name,
            project_id: parse_entity_id(&desired.project_id)?,
            kube_config_role_id: desired.role.platform_id(),
            is_accessible_for_all: all,
            is_accessible_for_manager: managers,
            namespace: &desired.namespace,
            ttl: desired.validity_period.unwrap_or(-1),
        };
        let created: Created = self.platform.client().post("/KubeConfig/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, role = %desired.role, "Created");
        self.platform
            .read_after(Operation::Create, || self.fetch(id, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<KubeconfigSpec, KubeconfigComputed>> {
        self.fetch(parse_entity_id(id)?, false).await
    }

    async fn update(&self, id: &str, desired: &KubeconfigSpec) -> Result<Observed<KubeconfigSpec, KubeconfigComputed>> {
        desired.validate()?;
        let current = self.fetch(parse_entity_id(id)?, false).await?;
        if current.spec != *desired {
            return Err(Error::validation("name", "kubeconfigs cannot change; delete and recreate"));
        }
        Ok(current)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        self.platform
            .delete_ignoring_missing(&format!("/KubeConfig/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
