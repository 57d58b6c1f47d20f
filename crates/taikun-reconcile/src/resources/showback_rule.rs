//! Showback rules: price a metric for cost reporting, either from the
//! platform's own Prometheus (`General`) or an external one (`External`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::convert::{PrometheusType, ShowbackKind};
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_name};
use taikun_core::{Error, Result, Validate};

use crate::binding::Label;
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowbackRuleSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub metric_name: String,
    #[serde(default)]
    pub kind: ShowbackKind,
    #[serde(default, rename = "type")]
    pub aggregation: PrometheusType,
    pub price: f64,
    #[serde(default)]
    pub project_alert_limit: i32,
    #[serde(default)]
    pub global_alert_limit: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub showback_credential_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Validate for ShowbackRuleSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        require_non_empty("metric_name", &self.metric_name)?;
        if self.price < 0.0 {
            return Err(Error::validation("price", "must not be negative"));
        }
        let credential = parse_optional_id(self.showback_credential_id.as_deref())?;
        match (self.kind, credential) {
            (ShowbackKind::External, None) => Err(Error::validation(
                "showback_credential_id",
                "required when kind is External",
            )),
            (ShowbackKind::General, Some(_)) => Err(Error::validation(
                "showback_credential_id",
                "not allowed when kind is General",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShowbackRuleComputed {
    pub organization_name: String,
    pub showback_credential_name: String,
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
    metric_name: String,
    #[serde(default)]
    kind: String,
    #[serde(default, rename = "type")]
    aggregation: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    project_alert_limit: i32,
    #[serde(default)]
    global_alert_limit: i32,
    #[serde(default)]
    showback_credential_id: Option<i32>,
    #[serde(default)]
    showback_credential_name: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(flatten)]
    audit: Audit,
}

/// Body shared by create and update; the platform replaces labels wholesale.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    metric_name: &'a str,
    kind: &'static str,
    #[serde(rename = "type")]
    aggregation: &'static str,
    price: f64,
    project_alert_limit: i32,
    global_alert_limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    showback_credential_id: Option<i32>,
    labels: &'a [Label],
}

impl<'a> Body<'a> {
    fn new(id: Option<i32>, spec: &'a ShowbackRuleSpec) -> Result<Self> {
        Ok(Self {
            id,
            name: &spec.name,
            organization_id: if id.is_some() {
                None
            } else {
                parse_optional_id(spec.organization_id.as_deref())?
            },
            metric_name: &spec.metric_name,
            kind: spec.kind.as_platform(),
            aggregation: spec.aggregation.as_platform(),
            price: spec.price,
            project_alert_limit: spec.project_alert_limit,
            global_alert_limit: spec.global_alert_limit,
            showback_credential_id: parse_optional_id(spec.showback_credential_id.as_deref())?,
            labels: &spec.labels,
        })
    }
}

fn observe(row: Row) -> Result<Observed<ShowbackRuleSpec, ShowbackRuleComputed>> {
    let spec = ShowbackRuleSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        metric_name: row.metric_name,
        kind: ShowbackKind::from_platform(&row.kind)?,
        aggregation: PrometheusType::from_platform(&row.aggregation)?,
        price: row.price,
        project_alert_limit: row.project_alert_limit,
        global_alert_limit: row.global_alert_limit,
        showback_credential_id: row.showback_credential_id.map(|c| c.to_string()),
        labels: row.labels,
    };
    let computed = ShowbackRuleComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        showback_credential_name: row.showback_credential_name.unwrap_or_default(),
        audit: row.audit,
    };
    Ok(Observed::new(row.id, spec, computed))
}

pub struct ShowbackRules {
    platform: Platform,
}

impl ShowbackRules {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Observed<ShowbackRuleSpec, ShowbackRuleComputed>> {
        let rows: Vec<Row> = self.platform.list_by_id("/ShowbackRules/list", id).await?;
        observe(expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)?)
    }
}

#[async_trait]
impl Reconciler for ShowbackRules {
    type Spec = ShowbackRuleSpec;
    type Computed = ShowbackRuleComputed;

    const KIND: &'static str = "showback rule";

    async fn create(&self, desired: &ShowbackRuleSpec) -> Result<Observed<ShowbackRuleSpec, ShowbackRuleComputed>> {
        desired.validate()?;
        let created: Created = self
            .platform
            .client()
            .post("/ShowbackRules/create", &Body::new(None, desired)?)
            .await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        self.platform
            .read_after(Operation::Create, || self.fetch(id, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<ShowbackRuleSpec, ShowbackRuleComputed>> {
        self.fetch(parse_entity_id(id)?, false).await
    }

    async fn update(&self, id: &str, desired: &ShowbackRuleSpec) -> Result<Observed<ShowbackRuleSpec, ShowbackRuleComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = self.fetch(id, false).await?.spec;
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        if current.kind != desired.kind {
            return Err(Error::validation("kind", "cannot change after creation"));
        }
        let mut normalised = desired.clone();
        normalised.organization_id.clone_from(&current.organization_id);
        if normalised != current {
            self.platform
                .client()
                .put_unit("/ShowbackRules/update", &Body::new(Some(id), desired)?)
                .await?;
        }
        self.platform
            .read_after(Operation::Update, || self.fetch(id, true))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        self.platform
            .delete_ignoring_missing(&format!("/ShowbackRules/{id}"))
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

    fn spec(kind: ShowbackKind, credential: Option<&str>) -> ShowbackRuleSpec {
        ShowbackRuleSpec {
            name: "ingress".into(),
            metric_name: "nginx_requests_total".into(),
            kind,
            price: 1.5,
            showback_credential_id: credential.map(String::from),
            ..ShowbackRuleSpec::default()
        }
    }

    #[test]
    fn credential_must_match_kind() {
        spec(ShowbackKind::General, None).validate().unwrap();
        spec(ShowbackKind::External, Some("4")).validate().unwrap();
        assert!(spec(ShowbackKind::External, None).validate().is_err());
        assert!(spec(ShowbackKind::General, Some("4")).validate().is_err());
    }

    #[test]
    fn body_uses_platform_enums() {
        let s = ShowbackRuleSpec {
            aggregation: PrometheusType::Sum,
            ..spec(ShowbackKind::External, Some("4"))
        };
        let v = serde_json::to_value(Body::new(None, &s).unwrap()).unwrap();
        assert_eq!(v["kind"], json!("EXTERNAL"));
        assert_eq!(v["type"], json!("SUM"));
        assert_eq!(v["showbackCredentialId"], json!(4));
        assert!(v.get("id").is_none());
    }
}
