//! Project relations: flavors by name, images by id, users by id.

use async_trait::async_trait;

use taikun_core::{Error, Result};

use crate::binding::{Binder, Binding};
use crate::platform::Platform;
use crate::resources::project_user::{BindUsersBody, UserBinding, bind_users};

use super::wire::{BindFlavorsBody, BindImagesBody, BoundFlavorRow, BoundImageRow, UnbindBody};

fn binding_ids<K: std::fmt::Debug>(relation: &str, bindings: &[Binding<K>]) -> Result<Vec<i32>> {
    bindings
        .iter()
        .map(|b| {
            b.binding_id
                .ok_or_else(|| Error::Inconsistent(format!("{relation} binding for {:?} has no id", b.member)))
        })
        .collect()
}

pub(super) struct ProjectFlavors<'a> {
    pub platform: &'a Platform,
    pub project: i32,
}

#[async_trait]
impl Binder for ProjectFlavors<'_> {
    type Member = String;

    fn relation(&self) -> String {
        format!("project {} flavors", self.project)
    }

    async fn observed(&self) -> Result<Vec<Binding<String>>> {
        let rows: Vec<BoundFlavorRow> = self
            .platform
            .list("/Flavors/projects/list", &[("ProjectId", self.project.to_string())])
            .await?;
        Ok(rows.into_iter().map(|r| Binding::new(Some(r.id), r.name)).collect())
    }

    async fn bind(&self, members: &[String]) -> Result<()> {
        let body = BindFlavorsBody {
            project_id: self.project,
            flavors: members,
        };
        self.platform.client().post_unit("/Flavors/bind", &body).await
    }

    async fn unbind(&self, bindings: &[Binding<String>]) -> Result<()> {
        let body = UnbindBody {
            ids: binding_ids("flavor", bindings)?,
        };
        self.platform.client().post_unit("/Flavors/unbind", &body).await
    }
}

pub(super) struct ProjectImages<'a> {
    pub platform: &'a Platform,
    pub project: i32,
}

#[async_trait]
impl Binder for ProjectImages<'_> {
    type Member = String;

    fn relation(&self) -> String {
        format!("project {} images", self.project)
    }

    async fn observed(&self) -> Result<Vec<Binding<String>>> {
        let rows: Vec<BoundImageRow> = self
            .platform
            .list("/Images/projects/list", &[("ProjectId", self.project.to_string())])
            .await?;
        Ok(rows.into_iter().map(|r| Binding::new(Some(r.id), r.image_id)).collect())
    }

    async fn bind(&self, members: &[String]) -> Result<()> {
        let body = BindImagesBody {
            project_id: self.project,
            images: members,
        };
        self.platform.client().post_unit("/Images/bind", &body).await
    }

    async fn unbind(&self, bindings: &[Binding<String>]) -> Result<()> {
        let body = UnbindBody {
            ids: binding_ids("image", bindings)?,
        };
        self.platform.client().post_unit("/Images/unbind", &body).await
    }
}

/// Users are read off the project row, so the caller hands them in.
pub(super) struct ProjectMembers<'a> {
    pub platform: &'a Platform,
    pub project: i32,
    pub observed: Vec<String>,
}

impl ProjectMembers<'_> {
    fn body<'u>(&self, users: impl Iterator<Item = &'u String>, bound: bool) -> BindUsersBody<'u> {
        BindUsersBody {
            project_id: self.project,
            user_list: users
                .map(|u| UserBinding {
                    user_id: u,
                    is_bound: bound,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Binder for ProjectMembers<'_> {
    type Member = String;

    fn relation(&self) -> String {
        format!("project {} users", self.project)
    }

    async fn observed(&self) -> Result<Vec<Binding<String>>> {
        Ok(self.observed.iter().map(|u| Binding::new(None, u.clone())).collect())
    }

    async fn bind(&self, members: &[String]) -> Result<()> {
        let body = self.body(members.iter(), true);
        bind_users(self.platform, &body).await
    }

    async fn unbind(&self, bindings: &[Binding<String>]) -> Result<()> {
        let body = self.body(bindings.iter().map(|b| &b.member), false);
        bind_users(self.platform, &body).await
    }
}
