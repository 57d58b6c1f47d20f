//! Slack configurations referenced by alerting profiles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_name, validate_url};
use taikun_core::{Error, Result, Validate};

use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlackKind {
    #[default]
    Alert,
    General,
}

impl SlackKind {
    const fn as_platform(self) -> i32 {
        match self {
            Self::Alert => 1,
            Self::General => 2,
        }
    }

    fn from_platform(raw: &str) -> Result<Self> {
        match raw {
            r if r.eq_ignore_ascii_case("alert") || r == "1" => Ok(Self::Alert),
            r if r.eq_ignore_ascii_case("general") || r == "2" => Ok(Self::General),
            other => Err(Error::Inconsistent(format!("unknown slack type `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfigurationSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub url: String,
    pub channel: String,
    #[serde(default, rename = "type")]
    pub kind: SlackKind,
}

impl Validate for SlackConfigurationSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        validate_url("url", &self.url)?;
        require_non_empty("channel", &self.channel)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlackConfigurationComputed {
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
    url: String,
    #[serde(default)]
    channel: String,
    /// Either the enum name or its number.
    #[serde(default, rename = "slackType")]
    kind: serde_json::Value,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    url: &'a str,
    channel: &'a str,
    slack_type: i32,
}

fn observe(row: Row) -> Result<Observed<SlackConfigurationSpec, SlackConfigurationComputed>> {
    let kind = match &row.kind {
        serde_json::Value::String(s) => SlackKind::from_platform(s)?,
        other => SlackKind::from_platform(&other.to_string())?,
    };
    Ok(Observed::new(
        row.id,
        SlackConfigurationSpec {
            name: row.name,
            organization_id: row.organization_id.map(|o| o.to_string()),
            url: row.url,
            channel: row.channel,
            kind,
        },
        SlackConfigurationComputed {
            organization_name: row.organization_name.unwrap_or_default(),
            audit: row.audit,
        },
    ))
}

pub struct SlackConfigurations {
    platform: Platform,
}

impl SlackConfigurations {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(
        &self,
        id: i32,
        after_op: bool,
    ) -> Result<Observed<SlackConfigurationSpec, SlackConfigurationComputed>> {
        let rows: Vec<Row> = self.platform.list_by_id("/SlackConfiguration/list", id).await?;
        observe(expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)?)
    }
}

#[async_trait]
impl Reconciler for SlackConfigurations {
    type Spec = SlackConfigurationSpec;
    type Computed = SlackConfigurationComputed;

    const KIND: &'static str = "slack configuration";

    async fn create(
        &self,
        desired: &SlackConfigurationSpec,
    ) -> Result<Observed<SlackConfigurationSpec, SlackConfigurationComputed>> {
        desired.validate()?;
        let body = Body {
            id: None,
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            url: &desired.url,
            channel: &desired.channel,
            slack_type: desired.kind.as_platform(),
        };
        let created: Created = self.platform.client().post("/SlackConfiguration/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        self.platform
            .read_after(Operation::Create, || self.fetch(id, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<SlackConfigurationSpec, SlackConfigurationComputed>> {
        self.fetch(parse_entity_id(id)?, false).await
    }

    async fn update(
        &self,
        id: &str,
        desired: &SlackConfigurationSpec,
    ) -> Result<Observed<SlackConfigurationSpec, SlackConfigurationComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let current = self.fetch(id, false).await?.spec;
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        let mut normalised = desired.clone();
        normalised.organization_id.clone_from(&current.organization_id);
        if normalised != current {
            let body = Body {
                id: Some(id),
                name: &desired.name,
                organization_id: None,
                url: &desired.url,
                channel: &desired.channel,
                slack_type: desired.kind.as_platform(),
            };
            self.platform.client().put_unit("/SlackConfiguration/update", &body).await?;
        }
        self.platform
            .read_after(Operation::Update, || self.fetch(id, true))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        self.platform
            .delete_ignoring_missing(&format!("/SlackConfiguration/{id}"))
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
    fn reads_type_as_name_or_number() {
        for raw in [json!("General"), json!(2)] {
            let row: Row = serde_json::from_value(json!({
                "id": 8,
                "name": "alerts",
                "url": "https://hooks.slack.com/x",
                "channel": "ops",
                "slackType": raw
            }))
            .unwrap();
            assert_eq!(observe(row).unwrap().spec.kind, SlackKind::General);
        }
    }

    #[test]
    fn spec_uses_type_key() {
        let spec: SlackConfigurationSpec = serde_json::from_value(json!({
            "name": "alerts",
            "url": "https://hooks.slack.com/x",
            "channel": "ops",
            "type": "General"
        }))
        .unwrap();
        assert_eq!(spec.kind, SlackKind::General);
        spec.validate().unwrap();
    }
}
