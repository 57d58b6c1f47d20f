//! Child rows owned by a profile (SSH users, DNS servers, integrations, ...).
//!
//! Each row is created with the parent's id in its body and deleted by its
//! own id, so these relations all share one [`Binder`].

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use taikun_core::{Error, Result};

use crate::binding::{Binder, Binding};
use crate::platform::Platform;

/// A member's body for its create call, without the parent field.
pub(crate) trait MemberWire: Ord + Clone + Debug + Send + Sync {
    fn wire(&self) -> Map<String, Value>;
}

impl MemberWire for String {
    fn wire(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("address".into(), json!(self));
        body
    }
}

pub(crate) struct MemberRows<'a, K> {
    pub platform: &'a Platform,
    pub relation: &'static str,
    /// e.g. `/DnsServers/create`
    pub create_path: &'static str,
    /// Rows are deleted at `{delete_prefix}/{binding id}`.
    pub delete_prefix: &'static str,
    pub parent_field: &'static str,
    pub parent: i32,
    pub observed: Vec<Binding<K>>,
}

#[async_trait]
impl<K: MemberWire> Binder for MemberRows<'_, K> {
    type Member = K;

    fn relation(&self) -> String {
        format!("{} of {}", self.relation, self.parent)
    }

    async fn observed(&self) -> Result<Vec<Binding<K>>> {
        Ok(self.observed.clone())
    }

    async fn bind(&self, members: &[K]) -> Result<()> {
        for member in members {
            let mut body = member.wire();
            body.insert(self.parent_field.into(), json!(self.parent));
            self.platform.client().post_unit(self.create_path, &body).await?;
        }
        Ok(())
    }

    async fn unbind(&self, bindings: &[Binding<K>]) -> Result<()> {
        for binding in bindings {
            let id = binding.binding_id.ok_or_else(|| {
                Error::Inconsistent(format!("{} row for {:?} has no id", self.relation, binding.member))
            })?;
            self.platform
                .client()
                .delete(&format!("{}/{id}", self.delete_prefix))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn address_members_wire_as_address() {
        let body = "8.8.8.8".to_string().wire();
        assert_eq!(Value::Object(body), json!({"address": "8.8.8.8"}));
    }
}
