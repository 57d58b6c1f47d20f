//! Platform users. Unlike every other kind they are keyed by a GUID string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::parse_optional_id;
use taikun_core::validate::{require_non_empty, validate_email, validate_name};
use taikun_core::{Error, Result, Validate};

use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserRole {
    #[default]
    User,
    Manager,
}

impl UserRole {
    const fn as_platform(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Manager => "Manager",
        }
    }

    fn from_platform(raw: &str) -> Result<Self> {
        match raw {
            r if r.eq_ignore_ascii_case("user") => Ok(Self::User),
            r if r.eq_ignore_ascii_case("manager") => Ok(Self::Manager),
            other => Err(Error::Inconsistent(format!("unknown user role `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub disable: bool,
}

impl Validate for UserSpec {
    fn validate(&self) -> Result<()> {
        validate_name("user_name", &self.user_name, 3, 30)?;
        validate_email("email", &self.email)?;
        parse_optional_id(self.organization_id.as_deref())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserComputed {
    pub organization_name: String,
    pub email_confirmed: bool,
    pub is_owner: bool,
    pub is_csm: bool,
    pub bound_project_ids: Vec<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Row {
    pub id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    organization_id: Option<i32>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    is_disabled: bool,
    #[serde(default)]
    email_confirmed: bool,
    #[serde(default)]
    owner: bool,
    #[serde(default)]
    is_csm: bool,
    #[serde(default)]
    pub bound_projects: Vec<BoundProject>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BoundProject {
    pub project_id: i32,
    #[serde(default)]
    pub project_name: Option<String>,
}

/// Body shared by create and update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    username: &'a str,
    email: &'a str,
    role: &'static str,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable: Option<bool>,
}

fn observe(row: Row) -> Result<Observed<UserSpec, UserComputed>> {
    let spec = UserSpec {
        user_name: row.username,
        email: row.email,
        role: UserRole::from_platform(&row.role)?,
        display_name: row.display_name.unwrap_or_default(),
        organization_id: row.organization_id.map(|o| o.to_string()),
        disable: row.is_disabled,
    };
    let computed = UserComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        email_confirmed: row.email_confirmed,
        is_owner: row.owner,
        is_csm: row.is_csm,
        bound_project_ids: row.bound_projects.iter().map(|p| p.project_id.to_string()).collect(),
        audit: row.audit,
    };
    Ok(Observed::new(row.id, spec, computed))
}

pub(crate) async fn fetch_user(platform: &Platform, id: &str, after_op: bool) -> Result<Row> {
    let rows: Vec<Row> = platform.list_by_id("/Users/list", id).await?;
    expect_one(rows, Users::KIND, id, after_op, |r| r.id == id)
}

fn require_guid(id: &str) -> Result<&str> {
    let id = id.trim();
    require_non_empty("id", id).map_err(|_| Error::malformed_id(id, "user id is empty"))?;
    Ok(id)
}

pub struct Users {
    platform: Platform,
}

impl Users {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Reconciler for Users {
    type Spec = UserSpec;
    type Computed = UserComputed;

    const KIND: &'static str = "user";

    async fn create(&self, desired: &UserSpec) -> Result<Observed<UserSpec, UserComputed>> {
        desired.validate()?;
        let body = Body {
            id: None,
            username: &desired.user_name,
            email: &desired.email,
            role: desired.role.as_platform(),
            display_name: &desired.display_name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            disable: None,
        };
        let created: Created = self.platform.client().post("/Users/create", &body).await?;
        let id = created.raw_id();
        info!(kind = Self::KIND, %id, "Created");
        if desired.disable {
            let disable = Body {
                id: Some(&id),
                disable: Some(true),
                organization_id: None,
                ..body
            };
            self.platform.client().put_unit("/Users/update", &disable).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { observe(fetch_user(&self.platform, &id, true).await?) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<UserSpec, UserComputed>> {
        let id = require_guid(id)?;
        observe(fetch_user(&self.platform, id, false).await?)
    }

    async fn update(&self, id: &str, desired: &UserSpec) -> Result<Observed<UserSpec, UserComputed>> {
        desired.validate()?;
        let id = require_guid(id)?;
        let current = observe(fetch_user(&self.platform, id, false).await?)?.spec;
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        let mut normalised = desired.clone();
        normalised.organization_id.clone_from(&current.organization_id);
        if normalised != current {
            let body = Body {
                id: Some(id),
                username: &desired.user_name,
                email: &desired.email,
                role: desired.role.as_platform(),
                display_name: &desired.display_name,
                organization_id: None,
                disable: Some(desired.disable),
            };
            self.platform.client().put_unit("/Users/update", &body).await?;
        }
        self.platform
            .read_after(Operation::Update, || async { observe(fetch_user(&self.platform, id, true).await?) })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = require_guid(id)?;
        self.platform.delete_ignoring_missing(&format!("/Users/{id}")).await?;
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
    fn observes_guid_id_and_bound_projects() {
        let row: Row = serde_json::from_value(json!({
            "id": "5b1f0e2c-7a1d-4b1e-9a0e-0c6f1b2d3e4f",
            "username": "jdoe",
            "email": "jdoe@acme.io",
            "role": "Manager",
            "organizationId": 2,
            "boundProjects": [{"projectId": 14, "projectName": "prod"}],
            "emailConfirmed": true
        }))
        .unwrap();
        let observed = observe(row).unwrap();
        assert_eq!(observed.id, "5b1f0e2c-7a1d-4b1e-9a0e-0c6f1b2d3e4f");
        assert_eq!(observed.spec.role, UserRole::Manager);
        assert_eq!(observed.computed.bound_project_ids, vec!["14"]);
        assert!(observed.computed.email_confirmed);
    }

    #[test]
    fn empty_id_is_malformed() {
        assert!(matches!(require_guid("  ").unwrap_err(), Error::MalformedId { .. }));
    }

    #[test]
    fn update_body_carries_id_and_disable_flag() {
        let body = Body {
            id: Some("abc"),
            username: "jdoe",
            email: "jdoe@acme.io",
            role: UserRole::User.as_platform(),
            display_name: "",
            organization_id: None,
            disable: Some(true),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["id"], json!("abc"));
        assert_eq!(v["disable"], json!(true));
        assert!(v.get("organizationId").is_none());
    }
}
