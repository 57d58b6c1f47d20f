//! One organization bound to one billing rule, keyed `<rule>/<organization>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_core::id::{CompositeId, parse_entity_id};
use taikun_core::{Error, Result, Validate};

use crate::platform::Platform;
use crate::reconciler::{Observed, Reconciler};
use crate::resources::billing_rule::{OrganizationBinding, bind_organizations, fetch_rule, validate_discount};
use crate::wait::Operation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationBillingRuleSpec {
    pub billing_rule_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub discount_rate: f64,
}

impl Validate for OrganizationBillingRuleSpec {
    fn validate(&self) -> Result<()> {
        parse_entity_id(&self.billing_rule_id).map_err(|e| Error::validation("billing_rule_id", e.to_string()))?;
        parse_entity_id(&self.organization_id).map_err(|e| Error::validation("organization_id", e.to_string()))?;
        validate_discount("discount_rate", self.discount_rate)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationBillingRuleComputed {
    pub organization_name: String,
}

pub struct OrganizationBillingRules {
    platform: Platform,
}

impl OrganizationBillingRules {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(
        &self,
        rule: i32,
        organization: i32,
        after_op: bool,
    ) -> Result<Observed<OrganizationBillingRuleSpec, OrganizationBillingRuleComputed>> {
        let id = CompositeId::new(rule, organization.to_string());
        let row = match fetch_rule(&self.platform, rule, after_op).await {
            // A vanished rule takes the binding with it.
            Err(e) if e.is_not_found() => return Err(Error::not_found(Self::KIND, id.to_string())),
            other => other?,
        };
        let mut bound = row
            .bound_organizations
            .into_iter()
            .filter(|b| b.organization_id == organization);
        match (bound.next(), bound.next()) {
            (Some(b), None) => Ok(Observed::new(
                &id,
                OrganizationBillingRuleSpec {
                    billing_rule_id: rule.to_string(),
                    organization_id: organization.to_string(),
                    discount_rate: b.rule_discount_rate,
                },
                OrganizationBillingRuleComputed {
                    organization_name: b.organization_name.unwrap_or_default(),
                },
            )),
            (None, _) if after_op => Err(Error::not_found_after_op(Self::KIND, id.to_string())),
            (None, _) => Err(Error::not_found(Self::KIND, id.to_string())),
            (Some(_), Some(_)) => Err(Error::Inconsistent(format!(
                "organization {organization} bound twice to billing rule {rule}"
            ))),
        }
    }
}

fn split(id: &str) -> Result<(i32, i32)> {
    let composite: CompositeId = id.parse()?;
    Ok((composite.parent, composite.child_id()?))
}

#[async_trait]
impl Reconciler for OrganizationBillingRules {
    type Spec = OrganizationBillingRuleSpec;
    type Computed = OrganizationBillingRuleComputed;

    const KIND: &'static str = "organization billing rule";

    async fn create(
        &self,
        desired: &OrganizationBillingRuleSpec,
    ) -> Result<Observed<OrganizationBillingRuleSpec, OrganizationBillingRuleComputed>> {
        desired.validate()?;
        let rule = parse_entity_id(&desired.billing_rule_id)?;
        let organization = parse_entity_id(&desired.organization_id)?;
        bind_organizations(
            &self.platform,
            rule,
            vec![OrganizationBinding {
                organization_id: organization,
                rule_discount_rate: desired.discount_rate,
                is_bound: true,
            }],
        )
        .await?;
        info!(kind = Self::KIND, rule, organization, "Bound");
        self.platform
            .read_after(Operation::Create, || self.fetch(rule, organization, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<OrganizationBillingRuleSpec, OrganizationBillingRuleComputed>> {
        let (rule, organization) = split(id)?;
        self.fetch(rule, organization, false).await
    }

    async fn update(
        &self,
        id: &str,
        desired: &OrganizationBillingRuleSpec,
    ) -> Result<Observed<OrganizationBillingRuleSpec, OrganizationBillingRuleComputed>> {
        desired.validate()?;
        let (rule, organization) = split(id)?;
        let current = self.fetch(rule, organization, false).await?;
        if current.spec != *desired {
            return Err(Error::validation("billing_rule_id", "bindings cannot change; delete and recreate"));
        }
        Ok(current)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let (rule, organization) = split(id)?;
        let current = match self.fetch(rule, organization, false).await {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        };
        bind_organizations(
            &self.platform,
            rule,
            vec![OrganizationBinding {
                organization_id: organization,
                rule_discount_rate: current.spec.discount_rate,
                is_bound: false,
            }],
        )
        .await?;
        info!(kind = Self::KIND, rule, organization, "Unbound");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_splits_into_rule_and_organization() {
        assert_eq!(split("12/7").unwrap(), (12, 7));
        assert!(matches!(split("12").unwrap_err(), Error::MalformedId { .. }));
        assert!(split("12/acme").is_err());
    }

    #[test]
    fn discount_must_be_a_percentage() {
        let spec = OrganizationBillingRuleSpec {
            billing_rule_id: "1".into(),
            organization_id: "2".into(),
            discount_rate: -1.0,
        };
        assert!(spec.validate().is_err());
    }
}
