//! Organizations. The lock is a flag on the update body rather than a
//! lock-manager call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::parse_entity_id;
use taikun_core::validate::{validate_email, validate_name};
use taikun_core::{Result, Validate};

use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::resources::billing_rule::validate_discount;
use crate::wait::Operation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSpec {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub billing_email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub vat_number: String,
    #[serde(default)]
    pub discount_rate: f64,
    #[serde(default = "default_true")]
    pub let_managers_change_subscription: bool,
}

const fn default_true() -> bool {
    true
}

impl Validate for OrganizationSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        validate_name("full_name", &self.full_name, 1, 100)?;
        if !self.email.is_empty() {
            validate_email("email", &self.email)?;
        }
        if !self.billing_email.is_empty() {
            validate_email("billing_email", &self.billing_email)?;
        }
        validate_discount("discount_rate", self.discount_rate)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationComputed {
    pub is_read_only: bool,
    pub partner_name: String,
    pub projects: i32,
    pub servers: i32,
    pub users: i32,
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    id: i32,
    name: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    billing_email: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    vat_number: Option<String>,
    #[serde(default)]
    discount_rate: f64,
    #[serde(default)]
    let_managers_change_subscription: bool,
    #[serde(default)]
    is_read_only: bool,
    #[serde(default)]
    partner_name: Option<String>,
    #[serde(default)]
    projects: i32,
    #[serde(default)]
    servers: i32,
    #[serde(default)]
    users: i32,
    #[serde(flatten)]
    audit: Audit,
}

/// Body shared by create and update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
    name: &'a str,
    full_name: &'a str,
    phone: &'a str,
    email: &'a str,
    billing_email: &'a str,
    address: &'a str,
    city: &'a str,
    country: &'a str,
    vat_number: &'a str,
    discount_rate: f64,
    let_managers_change_subscription: bool,
    is_locked: bool,
}

impl<'a> Body<'a> {
    fn new(id: Option<i32>, spec: &'a OrganizationSpec, locked: bool) -> Self {
        Self {
            id,
            name: &spec.name,
            full_name: &spec.full_name,
            phone: &spec.phone,
            email: &spec.email,
            billing_email: &spec.billing_email,
            address: &spec.address,
            city: &spec.city,
            country: &spec.country,
            vat_number: &spec.vat_number,
            discount_rate: spec.discount_rate,
            let_managers_change_subscription: spec.let_managers_change_subscription,
            is_locked: locked,
        }
    }
}

fn observe(row: Row) -> Observed<OrganizationSpec, OrganizationComputed> {
    Observed::new(
        row.id,
        OrganizationSpec {
            name: row.name,
            full_name: row.full_name,
            lock: row.is_locked,
            phone: row.phone.unwrap_or_default(),
            email: row.email.unwrap_or_default(),
            billing_email: row.billing_email.unwrap_or_default(),
            address: row.address.unwrap_or_default(),
            city: row.city.unwrap_or_default(),
            country: row.country.unwrap_or_default(),
            vat_number: row.vat_number.unwrap_or_default(),
            discount_rate: row.discount_rate,
            let_managers_change_subscription: row.let_managers_change_subscription,
        },
        OrganizationComputed {
            is_read_only: row.is_read_only,
            partner_name: row.partner_name.unwrap_or_default(),
            projects: row.projects,
            servers: row.servers,
            users: row.users,
            audit: row.audit,
        },
    )
}

pub struct Organizations {
    platform: Platform,
}

impl Organizations {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/Organizations/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }

    async fn put(&self, id: i32, spec: &OrganizationSpec, locked: bool) -> Result<()> {
        self.platform
            .client()
            .put_unit(&format!("/Organizations/update/{id}"), &Body::new(Some(id), spec, locked))
            .await
    }
}

#[async_trait]
impl LockTarget for Organizations {
    fn lock_kind(&self) -> &'static str {
        Self::KIND
    }

    async fn observed_lock(&self, id: i32) -> Result<bool> {
        Ok(self.fetch(id, false).await?.is_locked)
    }

    /// Resends the observed fields with the flag flipped.
    async fn set_lock(&self, id: i32, locked: bool) -> Result<()> {
        let current = observe(self.fetch(id, false).await?).spec;
        info!(kind = Self::KIND, id, locked, "Setting lock");
        self.put(id, &current, locked).await
    }
}

#[async_trait]
impl Reconciler for Organizations {
    type Spec = OrganizationSpec;
    type Computed = OrganizationComputed;

    const KIND: &'static str = "organization";

    async fn create(&self, desired: &OrganizationSpec) -> Result<Observed<OrganizationSpec, OrganizationComputed>> {
        desired.validate()?;
        let created: Created = self
            .platform
            .client()
            .post("/Organizations/create", &Body::new(None, desired, false))
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

    async fn read(&self, id: &str) -> Result<Observed<OrganizationSpec, OrganizationComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &OrganizationSpec,
    ) -> Result<Observed<OrganizationSpec, OrganizationComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = observe(self.fetch(id, false).await?).spec;
        let mut normalised = desired.clone();
        normalised.lock = current.lock;
        let has_changes = normalised != current;
        // The unlocked window carries the new fields; the relock resends them
        // with the flag set.
        mediate(self, &self.platform, id, desired.lock, has_changes, || self.put(id, desired, false)).await?;
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
            .delete_ignoring_missing(&format!("/Organizations/{id}"))
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

    fn spec() -> OrganizationSpec {
        OrganizationSpec {
            name: "acme".into(),
            full_name: "Acme Corp".into(),
            email: "ops@acme.io".into(),
            discount_rate: 10.0,
            let_managers_change_subscription: true,
            ..OrganizationSpec::default()
        }
    }

    #[test]
    fn lock_rides_on_the_update_body() {
        let v = serde_json::to_value(Body::new(Some(7), &spec(), true)).unwrap();
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["isLocked"], json!(true));
        assert_eq!(v["fullName"], json!("Acme Corp"));
        assert_eq!(v["letManagersChangeSubscription"], json!(true));
    }

    #[test]
    fn rejects_bad_email_and_discount() {
        spec().validate().unwrap();
        let bad = OrganizationSpec {
            billing_email: "nobody".into(),
            ..spec()
        };
        assert!(bad.validate().is_err());
        let bad = OrganizationSpec {
            discount_rate: 150.0,
            ..spec()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn managers_may_change_subscription_by_default() {
        let s: OrganizationSpec = serde_json::from_value(json!({"name": "acme", "full_name": "Acme"})).unwrap();
        assert!(s.let_managers_change_subscription);
        assert!(!s.lock);
    }
}
