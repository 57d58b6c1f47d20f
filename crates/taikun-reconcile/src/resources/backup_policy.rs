//! Backup schedules of a project, keyed `<project>/<name>`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_core::id::{CompositeId, parse_entity_id};
use taikun_core::validate::{validate_cron, validate_name, validate_retention_period};
use taikun_core::{Error, Result, Validate};

use crate::platform::{Platform, expect_one};
use crate::reconciler::{Observed, Reconciler};
use crate::wait::Operation;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicySpec {
    pub name: String,
    pub project_id: String,
    pub cron_period: String,
    pub retention_period: String,
    #[serde(default)]
    pub included_namespaces: BTreeSet<String>,
}

impl Validate for BackupPolicySpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_entity_id(&self.project_id).map_err(|e| Error::validation("project_id", e.to_string()))?;
        validate_cron("cron_period", &self.cron_period)?;
        validate_retention_period("retention_period", &self.retention_period)?;
        if self.included_namespaces.iter().any(String::is_empty) {
            return Err(Error::validation("included_namespaces", "namespace must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupPolicyComputed {
    pub phase: String,
    pub last_backup: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    metadata_name: String,
    #[serde(default)]
    schedule: String,
    #[serde(default)]
    ttl: String,
    #[serde(default)]
    included_namespaces: Vec<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    last_backup: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    project_id: i32,
    name: &'a str,
    cron_period: &'a str,
    retention_period: &'a str,
    include_namespaces: &'a BTreeSet<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody<'a> {
    project_id: i32,
    name: &'a str,
}

fn observe(project: i32, row: Row) -> Observed<BackupPolicySpec, BackupPolicyComputed> {
    let id = CompositeId::new(project, row.metadata_name.clone());
    Observed::new(
        &id,
        BackupPolicySpec {
            name: row.metadata_name,
            project_id: project.to_string(),
            cron_period: row.schedule,
            retention_period: row.ttl,
            included_namespaces: row.included_namespaces.into_iter().collect(),
        },
        BackupPolicyComputed {
            phase: row.phase.unwrap_or_default(),
            last_backup: row.last_backup,
        },
    )
}

pub struct BackupPolicies {
    platform: Platform,
}

impl BackupPolicies {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(
        &self,
        project: i32,
        name: &str,
        after_op: bool,
    ) -> Result<Observed<BackupPolicySpec, BackupPolicyComputed>> {
        let rows: Vec<Row> = self
            .platform
            .list(&format!("/Backup/schedules/{project}"), &[("search", name.to_string())])
            .await?;
        let id = CompositeId::new(project, name);
        // `search` is a substring match.
        let row = expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.metadata_name == name)?;
        Ok(observe(project, row))
    }
}

#[async_trait]
impl Reconciler for BackupPolicies {
    type Spec = BackupPolicySpec;
    type Computed = BackupPolicyComputed;

    const KIND: &'static str = "backup policy";

    async fn create(&self, desired: &BackupPolicySpec) -> Result<Observed<BackupPolicySpec, BackupPolicyComputed>> {
        desired.validate()?;
        let project = parse_entity_id(&desired.project_id)?;
        let body = CreateBody {
            project_id: project,
            name: &desired.name,
            cron_period: &desired.cron_period,
            retention_period: &desired.retention_period,
            include_namespaces: &desired.included_namespaces,
        };
        self.platform.client().post_unit("/Backup/create", &body).await?;
        info!(kind = Self::KIND, project, name = %desired.name, "Created");
        self.platform
            .read_after(Operation::Create, || self.fetch(project, &desired.name, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<BackupPolicySpec, BackupPolicyComputed>> {
        let id: CompositeId = id.parse()?;
        self.fetch(id.parent, &id.child, false).await
    }

    async fn update(
        &self,
        id: &str,
        desired: &BackupPolicySpec,
    ) -> Result<Observed<BackupPolicySpec, BackupPolicyComputed>> {
        desired.validate()?;
        let id: CompositeId = id.parse()?;
        let current = self.fetch(id.parent, &id.child, false).await?;
        if current.spec != *desired {
            return Err(Error::validation("name", "backup policies cannot change; delete and recreate"));
        }
        Ok(current)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id: CompositeId = id.parse()?;
        match self.fetch(id.parent, &id.child, false).await {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        };
        let body = DeleteBody {
            project_id: id.parent,
            name: &id.child,
        };
        self.platform.client().post_unit("/Backup/deleteschedule", &body).await?;
        info!(kind = Self::KIND, %id, "Deleted");
        Ok(())
    }
}
