//! Billing credentials: the Prometheus endpoint billing rules read from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_name, validate_url};
use taikun_core::{Error, Result, Validate};

use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

const RESOURCE: &str = "OpsCredentials";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCredentialSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    pub prometheus_url: String,
    pub prometheus_username: String,
    /// Write-only: the platform never returns it.
    #[serde(default, skip_serializing)]
    pub prometheus_password: Option<String>,
}

impl Validate for BillingCredentialSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        validate_url("prometheus_url", &self.prometheus_url)?;
        require_non_empty("prometheus_username", &self.prometheus_username)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingCredentialComputed {
    pub organization_name: String,
    pub is_default: bool,
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
    prometheus_url: String,
    #[serde(default)]
    prometheus_username: String,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    prometheus_url: &'a str,
    prometheus_username: &'a str,
    prometheus_password: &'a str,
}

fn observe(row: Row) -> Observed<BillingCredentialSpec, BillingCredentialComputed> {
    let spec = BillingCredentialSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        prometheus_url: row.prometheus_url,
        prometheus_username: row.prometheus_username,
        prometheus_password: None,
    };
    let computed = BillingCredentialComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        is_default: row.is_default,
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

pub struct BillingCredentials {
    platform: Platform,
}

impl BillingCredentials {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/OpsCredentials/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }
}

#[async_trait]
impl LockTarget for BillingCredentials {
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
impl Reconciler for BillingCredentials {
    type Spec = BillingCredentialSpec;
    type Computed = BillingCredentialComputed;

    const KIND: &'static str = "billing credential";

    async fn create(
        &self,
        desired: &BillingCredentialSpec,
    ) -> Result<Observed<BillingCredentialSpec, BillingCredentialComputed>> {
        desired.validate()?;
        let password = desired
            .prometheus_password
            .as_deref()
            .ok_or_else(|| Error::validation("prometheus_password", "required on create"))?;
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            prometheus_url: &desired.prometheus_url,
            prometheus_username: &desired.prometheus_username,
            prometheus_password: password,
        };
        let created: Created = self.platform.client().post("/OpsCredentials/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<BillingCredentialSpec, BillingCredentialComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &BillingCredentialSpec,
    ) -> Result<Observed<BillingCredentialSpec, BillingCredentialComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        let changed = if current.name != desired.name {
            Some("name")
        } else if current.prometheus_url != desired.prometheus_url {
            Some("prometheus_url")
        } else if current.prometheus_username != desired.prometheus_username {
            Some("prometheus_username")
        } else if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            Some("organization_id")
        } else {
            None
        };
        if let Some(field) = changed {
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
            .delete_ignoring_missing(&format!("/OpsCredentials/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
