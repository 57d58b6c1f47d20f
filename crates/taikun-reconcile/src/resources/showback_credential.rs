//! Showback credentials: external Prometheus sources for showback rules.

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

const RESOURCE: &str = "ShowbackCredentials";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowbackCredentialSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    pub url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Validate for ShowbackCredentialSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        validate_url("url", &self.url)?;
        require_non_empty("username", &self.username)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShowbackCredentialComputed {
    pub organization_name: String,
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
    url: String,
    #[serde(default)]
    username: String,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    url: &'a str,
    username: &'a str,
    password: &'a str,
}

fn observe(row: Row) -> Observed<ShowbackCredentialSpec, ShowbackCredentialComputed> {
    Observed::new(
        row.id,
        ShowbackCredentialSpec {
            name: row.name,
            organization_id: row.organization_id.map(|o| o.to_string()),
            lock: row.is_locked,
            url: row.url,
            username: row.username,
            password: None,
        },
        ShowbackCredentialComputed {
            organization_name: row.organization_name.unwrap_or_default(),
            audit: row.audit,
        },
    )
}

pub struct ShowbackCredentials {
    platform: Platform,
}

impl ShowbackCredentials {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/ShowbackCredentials/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }
}

#[async_trait]
impl LockTarget for ShowbackCredentials {
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
impl Reconciler for ShowbackCredentials {
    type Spec = ShowbackCredentialSpec;
    type Computed = ShowbackCredentialComputed;

    const KIND: &'static str = "showback credential";

    async fn create(
        &self,
        desired: &ShowbackCredentialSpec,
    ) -> Result<Observed<ShowbackCredentialSpec, ShowbackCredentialComputed>> {
        desired.validate()?;
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            url: &desired.url,
            username: &desired.username,
            password: desired
                .password
                .as_deref()
                .ok_or_else(|| Error::validation("password", "required on create"))?,
        };
        let created: Created = self.platform.client().post("/ShowbackCredentials/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<ShowbackCredentialSpec, ShowbackCredentialComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &ShowbackCredentialSpec,
    ) -> Result<Observed<ShowbackCredentialSpec, ShowbackCredentialComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        for (field, same) in [
            ("name", current.name == desired.name),
            ("url", current.url == desired.url),
            ("username", current.username == desired.username),
            (
                "organization_id",
                desired.organization_id.is_none() || desired.organization_id == current.organization_id,
            ),
        ] {
            if !same {
                return Err(Error::validation(field, "cannot change after creation"));
            }
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
            .delete_ignoring_missing(&format!("/ShowbackCredentials/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
