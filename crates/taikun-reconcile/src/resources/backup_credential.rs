//! S3 backup credentials used by project backups.

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

const RESOURCE: &str = "S3Credentials";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCredentialSpec {
    pub s3_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    pub access_key_id: String,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
}

impl Validate for BackupCredentialSpec {
    fn validate(&self) -> Result<()> {
        validate_name("s3_name", &self.s3_name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        require_non_empty("access_key_id", &self.access_key_id)?;
        validate_url("endpoint", &self.endpoint)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupCredentialComputed {
    pub organization_name: String,
    /// The platform's default credential for the organization.
    pub is_default: bool,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    id: i32,
    s3_name: String,
    #[serde(default)]
    organization_id: Option<i32>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    s3_access_key_id: String,
    #[serde(default)]
    s3_endpoint: String,
    #[serde(default)]
    s3_region: Option<String>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    s3_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    s3_access_key_id: &'a str,
    s3_secret_key: &'a str,
    s3_endpoint: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    s3_region: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    id: i32,
    s3_name: &'a str,
    s3_access_key_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    s3_secret_key: Option<&'a str>,
}

fn observe(row: Row) -> Observed<BackupCredentialSpec, BackupCredentialComputed> {
    Observed::new(
        row.id,
        BackupCredentialSpec {
            s3_name: row.s3_name,
            organization_id: row.organization_id.map(|o| o.to_string()),
            lock: row.is_locked,
            access_key_id: row.s3_access_key_id,
            secret_access_key: None,
            endpoint: row.s3_endpoint,
            region: row.s3_region.unwrap_or_default(),
        },
        BackupCredentialComputed {
            organization_name: row.organization_name.unwrap_or_default(),
            is_default: row.is_default,
            audit: row.audit,
        },
    )
}

pub struct BackupCredentials {
    platform: Platform,
}

impl BackupCredentials {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/S3Credentials/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }

    async fn apply(&self, id: i32, desired: &BackupCredentialSpec) -> Result<()> {
        let body = UpdateBody {
            id,
            s3_name: &desired.s3_name,
            s3_access_key_id: &desired.access_key_id,
            s3_secret_key: desired.secret_access_key.as_deref(),
        };
        self.platform.client().put_unit("/S3Credentials/update", &body).await
    }
}

#[async_trait]
impl LockTarget for BackupCredentials {
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
impl Reconciler for BackupCredentials {
    type Spec = BackupCredentialSpec;
    type Computed = BackupCredentialComputed;

    const KIND: &'static str = "backup credential";

    async fn create(
        &self,
        desired: &BackupCredentialSpec,
    ) -> Result<Observed<BackupCredentialSpec, BackupCredentialComputed>> {
        desired.validate()?;
        let body = CreateBody {
            s3_name: &desired.s3_name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            s3_access_key_id: &desired.access_key_id,
            s3_secret_key: desired
                .secret_access_key
                .as_deref()
                .ok_or_else(|| Error::validation("secret_access_key", "required on create"))?,
            s3_endpoint: &desired.endpoint,
            s3_region: &desired.region,
        };
        let created: Created = self.platform.client().post("/S3Credentials/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<BackupCredentialSpec, BackupCredentialComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &BackupCredentialSpec,
    ) -> Result<Observed<BackupCredentialSpec, BackupCredentialComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        for (field, same) in [
            ("endpoint", current.endpoint == desired.endpoint),
            ("region", current.region == desired.region),
            (
                "organization_id",
                desired.organization_id.is_none() || desired.organization_id == current.organization_id,
            ),
        ] {
            if !same {
                return Err(Error::validation(field, "cannot change after creation"));
            }
        }
        // A rotated secret alone is invisible here; it rides along with a
        // name or key change.
        let has_changes = current.s3_name != desired.s3_name || current.access_key_id != desired.access_key_id;
        mediate(self, &self.platform, id, desired.lock, has_changes, || self.apply(id, desired)).await?;
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
            .delete_ignoring_missing(&format!("/S3Credentials/{id}"))
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
    fn secret_is_never_rendered() {
        let row: Row = serde_json::from_value(json!({
            "id": 3,
            "s3Name": "minio",
            "s3AccessKeyId": "AKIA",
            "s3Endpoint": "https://s3.example.com",
            "s3Region": "eu-west-1",
            "isLocked": false
        }))
        .unwrap();
        let observed = observe(row);
        let v = serde_json::to_value(&observed).unwrap();
        assert_eq!(v["id"], json!("3"));
        assert_eq!(v["region"], json!("eu-west-1"));
        assert!(v.get("secret_access_key").is_none());
    }

    #[test]
    fn update_body_omits_unset_secret() {
        let body = UpdateBody {
            id: 3,
            s3_name: "minio",
            s3_access_key_id: "AKIA",
            s3_secret_key: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"id": 3, "s3Name": "minio", "s3AccessKeyId": "AKIA"})
        );
    }
}
