//! Billing rules: price a Prometheus metric and bind the price to
//! organizations, each with its own discount.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::convert::PrometheusType;
use taikun_core::id::parse_entity_id;
use taikun_core::validate::{require_non_empty, validate_name};
use taikun_core::{Error, Result, Validate};

use crate::binding::{Binder, Binding, Label, LabelDiff, ObservedLabel, reconcile_bindings};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

/// An organization bound to a rule, with the rule's discount for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationDiscount {
    pub organization_id: String,
    #[serde(default)]
    pub discount_rate: f64,
}

impl PartialEq for OrganizationDiscount {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrganizationDiscount {}

impl PartialOrd for OrganizationDiscount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrganizationDiscount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.organization_id
            .cmp(&other.organization_id)
            .then(self.discount_rate.total_cmp(&other.discount_rate))
    }
}

pub(crate) fn validate_discount(path: &str, rate: f64) -> Result<()> {
    if (0.0..=100.0).contains(&rate) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("discount rate must be within 0..=100, got {rate}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingRuleSpec {
    pub name: String,
    pub metric_name: String,
    pub price: f64,
    #[serde(default, rename = "type")]
    pub kind: PrometheusType,
    pub billing_credential_id: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Organizations this rule applies to. Left unmanaged when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizations: Option<BTreeSet<OrganizationDiscount>>,
}

impl Validate for BillingRuleSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        require_non_empty("metric_name", &self.metric_name)?;
        parse_entity_id(&self.billing_credential_id)
            .map_err(|e| Error::validation("billing_credential_id", e.to_string()))?;
        if self.price < 0.0 {
            return Err(Error::validation("price", "must not be negative"));
        }
        for label in &self.labels {
            require_non_empty("labels.key", &label.key)?;
        }
        for org in self.organizations.iter().flatten() {
            parse_entity_id(&org.organization_id)
                .map_err(|e| Error::validation("organizations.organization_id", e.to_string()))?;
            validate_discount("organizations.discount_rate", org.discount_rate)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BillingRuleComputed {
    pub billing_credential_name: String,
    #[serde(flatten)]
    pub audit: Audit,
}

// =========================================================================
// Wire
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Row {
    pub id: i32,
    name: String,
    #[serde(default)]
    metric_name: String,
    #[serde(default)]
    price: f64,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    operation_credential_id: i32,
    #[serde(default)]
    operation_credential_name: Option<String>,
    #[serde(default)]
    labels: Vec<ObservedLabel>,
    #[serde(default)]
    pub bound_organizations: Vec<BoundOrganization>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BoundOrganization {
    pub organization_id: i32,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub rule_discount_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    metric_name: &'a str,
    price: f64,
    #[serde(rename = "type")]
    kind: &'static str,
    operation_credential_id: i32,
    labels: &'a [Label],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    name: &'a str,
    metric_name: &'a str,
    price: f64,
    #[serde(rename = "type")]
    kind: &'static str,
    operation_credential_id: i32,
    #[serde(flatten)]
    labels: LabelDiff,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BindOrganizationsBody {
    pub prometheus_rule_id: i32,
    pub organizations: Vec<OrganizationBinding>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrganizationBinding {
    pub organization_id: i32,
    pub rule_discount_rate: f64,
    pub is_bound: bool,
}

fn observe(row: Row) -> Result<Observed<BillingRuleSpec, BillingRuleComputed>> {
    let spec = BillingRuleSpec {
        name: row.name,
        metric_name: row.metric_name,
        price: row.price,
        kind: PrometheusType::from_platform(&row.kind)?,
        billing_credential_id: row.operation_credential_id.to_string(),
        labels: row
            .labels
            .into_iter()
            .map(|l| Label::new(l.key, l.value))
            .collect(),
        organizations: Some(
            row.bound_organizations
                .iter()
                .map(|b| OrganizationDiscount {
                    organization_id: b.organization_id.to_string(),
                    discount_rate: b.rule_discount_rate,
                })
                .collect(),
        ),
    };
    let computed = BillingRuleComputed {
        billing_credential_name: row.operation_credential_name.unwrap_or_default(),
        audit: row.audit,
    };
    Ok(Observed::new(row.id, spec, computed))
}

pub(crate) async fn fetch_rule(platform: &Platform, id: i32, after_op: bool) -> Result<Row> {
    let rows: Vec<Row> = platform.list_by_id("/PrometheusRules/list", id).await?;
    expect_one(rows, BillingRules::KIND, &id.to_string(), after_op, |r| r.id == id)
}

pub(crate) async fn bind_organizations(platform: &Platform, rule: i32, organizations: Vec<OrganizationBinding>) -> Result<()> {
    let body = BindOrganizationsBody {
        prometheus_rule_id: rule,
        organizations,
    };
    platform
        .client()
        .post_unit("/PrometheusRules/bindorganizations", &body)
        .await
}

/// Rule to organization relation, bound and unbound through one endpoint.
struct RuleOrganizations<'a> {
    platform: &'a Platform,
    rule: i32,
    observed: Vec<Binding<OrganizationDiscount>>,
}

#[async_trait]
impl Binder for RuleOrganizations<'_> {
    type Member = OrganizationDiscount;

    fn relation(&self) -> String {
        format!("billing rule {} organizations", self.rule)
    }

    async fn observed(&self) -> Result<Vec<Binding<OrganizationDiscount>>> {
        Ok(self.observed.clone())
    }

    async fn bind(&self, members: &[OrganizationDiscount]) -> Result<()> {
        let organizations = members
            .iter()
            .map(|m| {
                Ok(OrganizationBinding {
                    organization_id: parse_entity_id(&m.organization_id)?,
                    rule_discount_rate: m.discount_rate,
                    is_bound: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        bind_organizations(self.platform, self.rule, organizations).await
    }

    async fn unbind(&self, bindings: &[Binding<OrganizationDiscount>]) -> Result<()> {
        let organizations = bindings
            .iter()
            .map(|b| {
                Ok(OrganizationBinding {
                    organization_id: parse_entity_id(&b.member.organization_id)?,
                    rule_discount_rate: b.member.discount_rate,
                    is_bound: false,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        bind_organizations(self.platform, self.rule, organizations).await
    }
}

// =========================================================================
// Reconciler
// =========================================================================

pub struct BillingRules {
    platform: Platform,
}

impl BillingRules {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn sync_organizations(&self, id: i32, row: Option<&Row>, desired: &BTreeSet<OrganizationDiscount>) -> Result<()> {
        let observed = row
            .map(|r| {
                r.bound_organizations
                    .iter()
                    .map(|b| {
                        Binding::new(
                            None,
                            OrganizationDiscount {
                                organization_id: b.organization_id.to_string(),
                                discount_rate: b.rule_discount_rate,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        let binder = RuleOrganizations {
            platform: &self.platform,
            rule: id,
            observed,
        };
        reconcile_bindings(&binder, desired).await.map(drop)
    }

    async fn observe_after(&self, op: Operation, id: i32) -> Result<Observed<BillingRuleSpec, BillingRuleComputed>> {
        self.platform
            .read_after(op, || async { observe(fetch_rule(&self.platform, id, true).await?) })
            .await
    }
}

#[async_trait]
impl Reconciler for BillingRules {
    type Spec = BillingRuleSpec;
    type Computed = BillingRuleComputed;

    const KIND: &'static str = "billing rule";

    async fn create(&self, desired: &BillingRuleSpec) -> Result<Observed<BillingRuleSpec, BillingRuleComputed>> {
        desired.validate()?;
        let body = CreateBody {
            name: &desired.name,
            metric_name: &desired.metric_name,
            price: desired.price,
            kind: desired.kind.as_platform(),
            operation_credential_id: parse_entity_id(&desired.billing_credential_id)?,
            labels: &desired.labels,
        };
        let created: Created = self.platform.client().post("/PrometheusRules/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if let Some(orgs) = &desired.organizations {
            self.sync_organizations(id, None, orgs).await?;
        }
        self.observe_after(Operation::Create, id).await
    }

    async fn read(&self, id: &str) -> Result<Observed<BillingRuleSpec, BillingRuleComputed>> {
        let id = parse_entity_id(id)?;
        observe(fetch_rule(&self.platform, id, false).await?)
    }

    async fn update(&self, id: &str, desired: &BillingRuleSpec) -> Result<Observed<BillingRuleSpec, BillingRuleComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let row = fetch_rule(&self.platform, id, false).await?;
        let current = observe(row.clone())?.spec;

        let fields_changed = current.name != desired.name
            || current.metric_name != desired.metric_name
            || (current.price - desired.price).abs() > f64::EPSILON
            || current.kind != desired.kind
            || current.billing_credential_id != desired.billing_credential_id
            || current.labels != desired.labels;
        if fields_changed {
            let body = UpdateBody {
                name: &desired.name,
                metric_name: &desired.metric_name,
                price: desired.price,
                kind: desired.kind.as_platform(),
                operation_credential_id: parse_entity_id(&desired.billing_credential_id)?,
                labels: LabelDiff::replace_all(&row.labels, &desired.labels),
            };
            self.platform
                .client()
                .put_unit(&format!("/PrometheusRules/update/{id}"), &body)
                .await?;
        }
        if let Some(orgs) = &desired.organizations {
            self.sync_organizations(id, Some(&row), orgs).await?;
        }
        self.observe_after(Operation::Update, id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        self.platform
            .delete_ignoring_missing(&format!("/PrometheusRules/{id}"))
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
    fn observe_translates_type_and_credential() {
        let row: Row = serde_json::from_value(json!({
            "id": 12,
            "name": "cpu-hours",
            "metricName": "node_cpu_seconds_total",
            "price": 0.5,
            "type": "SUM",
            "operationCredentialId": 3,
            "labels": [{"id": 1, "key": "env", "value": "prod"}],
            "boundOrganizations": [{"organizationId": 7, "ruleDiscountRate": 10.0}]
        }))
        .unwrap();
        let rec = observe(row).unwrap();
        assert_eq!(rec.spec.kind, PrometheusType::Sum);
        assert_eq!(rec.spec.billing_credential_id, "3");
        assert_eq!(rec.spec.labels, vec![Label::new("env", "prod")]);
        let orgs = rec.spec.organizations.unwrap();
        assert_eq!(orgs.iter().next().unwrap().organization_id, "7");
    }

    #[test]
    fn update_body_replaces_labels() {
        let observed = vec![ObservedLabel {
            id: 11,
            key: "a".into(),
            value: "1".into(),
        }];
        let body = UpdateBody {
            name: "r",
            metric_name: "m",
            price: 1.0,
            kind: PrometheusType::Count.as_platform(),
            operation_credential_id: 3,
            labels: LabelDiff::replace_all(&observed, &[Label::new("c", "3")]),
        };
        let v = serde_json::to_value(body).unwrap();
        assert_eq!(v["type"], json!("COUNT"));
        assert_eq!(v["labelsToDelete"], json!([{"id": 11}]));
        assert_eq!(v["labelsToAdd"], json!([{"key": "c", "value": "3"}]));
    }

    #[test]
    fn discount_changes_are_distinct_members() {
        let a = OrganizationDiscount {
            organization_id: "1".into(),
            discount_rate: 5.0,
        };
        let b = OrganizationDiscount {
            discount_rate: 10.0,
            ..a.clone()
        };
        assert_ne!(a, b);
        assert!(validate_discount("d", 101.0).is_err());
    }
}
