//! Alerting profiles: where project alerts go (emails, webhooks, Slack and
//! third-party integrations) and how often reminders repeat.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{validate_email, validate_name, validate_url};
use taikun_core::{Error, Result, Validate};

use crate::binding::{Binding, reconcile_bindings};
use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::resources::members::{MemberRows, MemberWire};
use crate::wait::Operation;

const RESOURCE: &str = "AlertingProfiles";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reminder {
    #[default]
    None,
    HalfHour,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegrationKind {
    Opsgenie,
    Pagerduty,
    Splunk,
    MicrosoftTeams,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    #[serde(default)]
    pub header: BTreeSet<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    pub url: String,
    #[serde(default)]
    pub token: String,
}

impl MemberWire for Integration {
    fn wire(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("url".into(), json!(self.url));
        body.insert("token".into(), json!(self.token));
        body.insert("alertingIntegrationType".into(), json!(self.kind));
        body
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertingProfileSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_configuration_id: Option<String>,
    #[serde(default)]
    pub reminder: Reminder,
    #[serde(default)]
    pub emails: BTreeSet<String>,
    #[serde(default)]
    pub webhook: BTreeSet<Webhook>,
    #[serde(default)]
    pub integration: BTreeSet<Integration>,
}

impl Validate for AlertingProfileSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        parse_optional_id(self.slack_configuration_id.as_deref())?;
        for email in &self.emails {
            validate_email("emails", email)?;
        }
        for hook in &self.webhook {
            validate_url("webhook.url", &hook.url)?;
        }
        for integration in &self.integration {
            validate_url("integration.url", &integration.url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertingProfileComputed {
    pub organization_name: String,
    pub slack_configuration_name: String,
    pub project_ids: Vec<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

// =========================================================================
// Wire
// =========================================================================

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
    slack_configuration_id: Option<i32>,
    #[serde(default)]
    slack_configuration_name: Option<String>,
    #[serde(default)]
    reminder: Reminder,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    emails: Vec<EmailDto>,
    #[serde(default)]
    webhooks: Vec<WebhookDto>,
    #[serde(default)]
    alerting_integrations: Vec<IntegrationRow>,
    #[serde(default)]
    projects: Vec<ProjectRef>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailDto {
    email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WebhookDto {
    url: String,
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegrationRow {
    id: i32,
    url: String,
    #[serde(default)]
    token: Option<String>,
    alerting_integration_type: IntegrationKind,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectRef {
    id: i32,
}

impl IntegrationRow {
    fn member(&self) -> Integration {
        Integration {
            kind: self.alerting_integration_type,
            url: self.url.clone(),
            token: self.token.clone().unwrap_or_default(),
        }
    }
}

fn email_dtos(emails: &BTreeSet<String>) -> Vec<EmailDto> {
    emails.iter().map(|e| EmailDto { email: e.clone() }).collect()
}

fn webhook_dtos(hooks: &BTreeSet<Webhook>) -> Vec<WebhookDto> {
    hooks
        .iter()
        .map(|h| WebhookDto {
            url: h.url.clone(),
            headers: h.header.iter().cloned().collect(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slack_configuration_id: Option<i32>,
    reminder: Reminder,
    emails: Vec<EmailDto>,
    webhooks: Vec<WebhookDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditBody<'a> {
    id: i32,
    name: &'a str,
    slack_configuration_id: Option<i32>,
    reminder: Reminder,
}

fn observe(row: Row) -> Observed<AlertingProfileSpec, AlertingProfileComputed> {
    let spec = AlertingProfileSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        slack_configuration_id: row.slack_configuration_id.filter(|s| *s != 0).map(|s| s.to_string()),
        reminder: row.reminder,
        emails: row.emails.into_iter().map(|e| e.email).collect(),
        webhook: row
            .webhooks
            .into_iter()
            .map(|w| Webhook {
                url: w.url,
                header: w.headers.into_iter().collect(),
            })
            .collect(),
        integration: row.alerting_integrations.iter().map(IntegrationRow::member).collect(),
    };
    let computed = AlertingProfileComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        slack_configuration_name: row.slack_configuration_name.unwrap_or_default(),
        project_ids: row.projects.iter().map(|p| p.id.to_string()).collect(),
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

// =========================================================================
// Reconciler
// =========================================================================

pub struct AlertingProfiles {
    platform: Platform,
}

impl AlertingProfiles {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/AlertingProfiles/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }

    async fn sync_integrations(&self, id: i32, observed: Vec<Binding<Integration>>, desired: &BTreeSet<Integration>) -> Result<()> {
        let integrations = MemberRows {
            platform: &self.platform,
            relation: "alerting profile integrations",
            create_path: "/AlertingIntegrations/create",
            delete_prefix: "/AlertingIntegrations",
            parent_field: "alertingProfileId",
            parent: id,
            observed,
        };
        reconcile_bindings(&integrations, desired).await.map(drop)
    }

    async fn apply(&self, id: i32, current: &AlertingProfileSpec, row: &Row, desired: &AlertingProfileSpec) -> Result<()> {
        let client = self.platform.client();
        if current.name != desired.name
            || current.slack_configuration_id != desired.slack_configuration_id
            || current.reminder != desired.reminder
        {
            let body = EditBody {
                id,
                name: &desired.name,
                slack_configuration_id: parse_optional_id(desired.slack_configuration_id.as_deref())?,
                reminder: desired.reminder,
            };
            client.put_unit("/AlertingProfiles/edit", &body).await?;
        }
        if current.emails != desired.emails {
            client
                .put_unit(&format!("/AlertingProfiles/assignemails/{id}"), &email_dtos(&desired.emails))
                .await?;
        }
        if current.webhook != desired.webhook {
            client
                .put_unit(&format!("/AlertingProfiles/assignwebhooks/{id}"), &webhook_dtos(&desired.webhook))
                .await?;
        }
        let observed = row
            .alerting_integrations
            .iter()
            .map(|i| Binding::new(Some(i.id), i.member()))
            .collect();
        self.sync_integrations(id, observed, &desired.integration).await
    }
}

#[async_trait]
impl LockTarget for AlertingProfiles {
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
impl Reconciler for AlertingProfiles {
    type Spec = AlertingProfileSpec;
    type Computed = AlertingProfileComputed;

    const KIND: &'static str = "alerting profile";

    async fn create(&self, desired: &AlertingProfileSpec) -> Result<Observed<AlertingProfileSpec, AlertingProfileComputed>> {
        desired.validate()?;
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            slack_configuration_id: parse_optional_id(desired.slack_configuration_id.as_deref())?,
            reminder: desired.reminder,
            emails: email_dtos(&desired.emails),
            webhooks: webhook_dtos(&desired.webhook),
        };
        let created: Created = self.platform.client().post("/AlertingProfiles/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");

        if !desired.integration.is_empty() {
            self.sync_integrations(id, Vec::new(), &desired.integration).await?;
        }
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<AlertingProfileSpec, AlertingProfileComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &AlertingProfileSpec,
    ) -> Result<Observed<AlertingProfileSpec, AlertingProfileComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let row = self.fetch(id, false).await?;
        let current = observe(row.clone()).spec;
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }

        let mut normalised = desired.clone();
        normalised.lock = current.lock;
        normalised.organization_id.clone_from(&current.organization_id);
        let has_changes = normalised != current;
        mediate(self, &self.platform, id, desired.lock, has_changes, || {
            self.apply(id, &current, &row, desired)
        })
        .await?;
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
            .delete_ignoring_missing(&format!("/AlertingProfiles/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
