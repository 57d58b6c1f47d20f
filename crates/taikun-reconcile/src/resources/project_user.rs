//! One user bound to one project, keyed `<project>/<user>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_core::id::{CompositeId, parse_entity_id};
use taikun_core::validate::require_non_empty;
use taikun_core::{Error, Result, Validate};

use crate::platform::Platform;
use crate::reconciler::{Observed, Reconciler};
use crate::resources::user::fetch_user;
use crate::wait::Operation;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUserSpec {
    pub project_id: String,
    pub user_id: String,
}

impl Validate for ProjectUserSpec {
    fn validate(&self) -> Result<()> {
        parse_entity_id(&self.project_id).map_err(|e| Error::validation("project_id", e.to_string()))?;
        require_non_empty("user_id", &self.user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectUserComputed {
    pub project_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BindUsersBody<'a> {
    pub project_id: i32,
    pub user_list: Vec<UserBinding<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserBinding<'a> {
    pub user_id: &'a str,
    pub is_bound: bool,
}

/// `POST /UserProjects/bindusers` for any mix of binds and unbinds.
pub(crate) async fn bind_users(platform: &Platform, body: &BindUsersBody<'_>) -> Result<()> {
    platform.client().post_unit("/UserProjects/bindusers", body).await
}

pub struct ProjectUsers {
    platform: Platform,
}

impl ProjectUsers {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(
        &self,
        project: i32,
        user: &str,
        after_op: bool,
    ) -> Result<Observed<ProjectUserSpec, ProjectUserComputed>> {
        let id = CompositeId::new(project, user);
        let row = match fetch_user(&self.platform, user, after_op).await {
            Err(e) if e.is_not_found() => return Err(Error::not_found(Self::KIND, id.to_string())),
            other => other?,
        };
        match row.bound_projects.into_iter().find(|p| p.project_id == project) {
            Some(bound) => Ok(Observed::new(
                &id,
                ProjectUserSpec {
                    project_id: project.to_string(),
                    user_id: row.id,
                },
                ProjectUserComputed {
                    project_name: bound.project_name.unwrap_or_default(),
                },
            )),
            None if after_op => Err(Error::not_found_after_op(Self::KIND, id.to_string())),
            None => Err(Error::not_found(Self::KIND, id.to_string())),
        }
    }

    async fn set_bound(&self, project: i32, user: &str, bound: bool) -> Result<()> {
        let body = BindUsersBody {
            project_id: project,
            user_list: vec![UserBinding {
                user_id: user,
                is_bound: bound,
            }],
        };
        bind_users(&self.platform, &body).await
    }
}

#[async_trait]
impl Reconciler for ProjectUsers {
    type Spec = ProjectUserSpec;
    type Computed = ProjectUserComputed;

    const KIND: &'static str = "project user";

    async fn create(&self, desired: &ProjectUserSpec) -> Result<Observed<ProjectUserSpec, ProjectUserComputed>> {
        desired.validate()?;
        let project = parse_entity_id(&desired.project_id)?;
        self.set_bound(project, &desired.user_id, true).await?;
        info!(kind = Self::KIND, project, user = %desired.user_id, "Bound");
        self.platform
            .read_after(Operation::Create, || self.fetch(project, &desired.user_id, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<ProjectUserSpec, ProjectUserComputed>> {
        let id: CompositeId = id.parse()?;
        self.fetch(id.parent, &id.child, false).await
    }

    async fn update(
        &self,
        id: &str,
        desired: &ProjectUserSpec,
    ) -> Result<Observed<ProjectUserSpec, ProjectUserComputed>> {
        desired.validate()?;
        let id: CompositeId = id.parse()?;
        let current = self.fetch(id.parent, &id.child, false).await?;
        if current.spec != *desired {
            return Err(Error::validation("project_id", "bindings cannot change; delete and recreate"));
        }
        Ok(current)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id: CompositeId = id.parse()?;
        match self.fetch(id.parent, &id.child, false).await {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        };
        self.set_bound(id.parent, &id.child, false).await?;
        info!(kind = Self::KIND, %id, "Unbound");
        Ok(())
    }
}
