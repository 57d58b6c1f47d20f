//! Standalone VM profiles: SSH public key plus security-group rules.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use taikun_client::Created;
use taikun_core::convert::SecurityGroupProtocol;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_name, validate_port};
use taikun_core::{Error, Result, Validate};

use crate::binding::{Binding, reconcile_bindings};
use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::resources::members::{MemberRows, MemberWire};
use crate::wait::Operation;

const RESOURCE: &str = "StandAloneProfile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: String,
    #[serde(default)]
    pub protocol: SecurityGroupProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_min_range: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_max_range: Option<i32>,
    pub remote_ip_prefix: String,
}

impl SecurityGroup {
    fn sort_key(&self) -> (&str, &'static str, Option<i32>, Option<i32>, &str) {
        (
            &self.name,
            self.protocol.as_platform(),
            self.port_min_range,
            self.port_max_range,
            &self.remote_ip_prefix,
        )
    }
}

impl PartialOrd for SecurityGroup {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecurityGroup {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl MemberWire for SecurityGroup {
    fn wire(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("name".into(), json!(self.name));
        body.insert("protocol".into(), json!(self.protocol.as_platform()));
        body.insert("portMinRange".into(), json!(self.port_min_range));
        body.insert("portMaxRange".into(), json!(self.port_max_range));
        body.insert("remoteIpPrefix".into(), json!(self.remote_ip_prefix));
        body
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneProfileSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    pub public_key: String,
    #[serde(default)]
    pub security_group: BTreeSet<SecurityGroup>,
}

impl Validate for StandaloneProfileSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        require_non_empty("public_key", &self.public_key)?;
        for group in &self.security_group {
            validate_name("security_group.name", &group.name, 3, 30)?;
            require_non_empty("security_group.remote_ip_prefix", &group.remote_ip_prefix)?;
            match (group.protocol, group.port_min_range, group.port_max_range) {
                (SecurityGroupProtocol::Icmp, None, None) => {}
                (SecurityGroupProtocol::Icmp, _, _) => {
                    return Err(Error::validation(
                        "security_group.port_min_range",
                        "ICMP rules take no port range",
                    ));
                }
                (_, Some(min), Some(max)) => {
                    validate_port("security_group.port_min_range", min)?;
                    validate_port("security_group.port_max_range", max)?;
                    if min > max {
                        return Err(Error::validation(
                            "security_group.port_min_range",
                            format!("{min} is greater than port_max_range {max}"),
                        ));
                    }
                }
                _ => {
                    return Err(Error::validation(
                        "security_group.port_min_range",
                        "TCP and UDP rules need both port_min_range and port_max_range",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandaloneProfileComputed {
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
    is_locked: bool,
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    security_groups: Vec<SecurityGroupRow>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityGroupRow {
    id: i32,
    name: String,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    port_min_range: Option<i32>,
    #[serde(default)]
    port_max_range: Option<i32>,
    #[serde(default)]
    remote_ip_prefix: String,
}

impl SecurityGroupRow {
    fn member(&self) -> SecurityGroup {
        let protocol = SecurityGroupProtocol::parse_lenient(self.protocol.as_deref().unwrap_or_default());
        let icmp = protocol == SecurityGroupProtocol::Icmp;
        SecurityGroup {
            name: self.name.clone(),
            protocol,
            port_min_range: self.port_min_range.filter(|_| !icmp),
            port_max_range: self.port_max_range.filter(|_| !icmp),
            remote_ip_prefix: self.remote_ip_prefix.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    public_key: &'a str,
    security_groups: Vec<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct EditBody<'a> {
    id: i32,
    name: &'a str,
}

fn observe(row: Row) -> Observed<StandaloneProfileSpec, StandaloneProfileComputed> {
    let spec = StandaloneProfileSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        public_key: row.public_key,
        security_group: row.security_groups.iter().map(SecurityGroupRow::member).collect(),
    };
    let computed = StandaloneProfileComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

pub struct StandaloneProfiles {
    platform: Platform,
}

impl StandaloneProfiles {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/StandAloneProfile/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }

    async fn apply(&self, id: i32, row: &Row, desired: &StandaloneProfileSpec) -> Result<()> {
        if row.name != desired.name {
            let body = EditBody {
                id,
                name: &desired.name,
            };
            self.platform.client().put_unit("/StandAloneProfile/edit", &body).await?;
        }
        let groups = MemberRows {
            platform: &self.platform,
            relation: "standalone profile security groups",
            create_path: "/StandAloneProfileSecurityGroup/create",
            delete_prefix: "/StandAloneProfileSecurityGroup",
            parent_field: "standAloneProfileId",
            parent: id,
            observed: row
                .security_groups
                .iter()
                .map(|g| Binding::new(Some(g.id), g.member()))
                .collect(),
        };
        reconcile_bindings(&groups, &desired.security_group).await.map(drop)
    }
}

#[async_trait]
impl LockTarget for StandaloneProfiles {
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
impl Reconciler for StandaloneProfiles {
    type Spec = StandaloneProfileSpec;
    type Computed = StandaloneProfileComputed;

    const KIND: &'static str = "standalone profile";

    async fn create(
        &self,
        desired: &StandaloneProfileSpec,
    ) -> Result<Observed<StandaloneProfileSpec, StandaloneProfileComputed>> {
        desired.validate()?;
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            public_key: &desired.public_key,
            security_groups: desired.security_group.iter().map(MemberWire::wire).collect(),
        };
        let created: Created = self.platform.client().post("/StandAloneProfile/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");
        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<StandaloneProfileSpec, StandaloneProfileComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &StandaloneProfileSpec,
    ) -> Result<Observed<StandaloneProfileSpec, StandaloneProfileComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let row = self.fetch(id, false).await?;
        let current = observe(row.clone()).spec;
        if current.public_key != desired.public_key {
            return Err(Error::validation("public_key", "cannot change after creation"));
        }
        if desired.organization_id.is_some() && desired.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        let has_changes = current.name != desired.name || current.security_group != desired.security_group;
        mediate(self, &self.platform, id, desired.lock, has_changes, || self.apply(id, &row, desired)).await?;
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
            .delete_ignoring_missing(&format!("/StandAloneProfile/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
