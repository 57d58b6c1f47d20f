//! Access profiles: SSH users, DNS and NTP servers, allowed hosts and an
//! optional HTTP proxy applied to every server of a project.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{validate_ip, validate_mask_bits, validate_name, validate_posix_login, require_non_empty};
use taikun_core::{Error, Result, Validate};

use crate::binding::{Binding, reconcile_bindings};
use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::resources::members::{MemberRows, MemberWire};
use crate::wait::Operation;

const RESOURCE: &str = "AccessProfiles";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SshUser {
    pub name: String,
    pub public_key: String,
}

impl MemberWire for SshUser {
    fn wire(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("name".into(), json!(self.name));
        body.insert("sshPublicKey".into(), json!(self.public_key));
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllowedHost {
    pub address: String,
    pub mask_bits: u8,
    #[serde(default)]
    pub description: String,
}

impl MemberWire for AllowedHost {
    fn wire(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("address".into(), json!(self.address));
        body.insert("maskBits".into(), json!(self.mask_bits));
        body.insert("description".into(), json!(self.description));
        body
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProfileSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub ssh_user: BTreeSet<SshUser>,
    #[serde(default)]
    pub dns_server: BTreeSet<String>,
    #[serde(default)]
    pub ntp_server: BTreeSet<String>,
    #[serde(default)]
    pub allowed_host: BTreeSet<AllowedHost>,
}

impl Validate for AccessProfileSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        let mut logins = BTreeSet::new();
        for user in &self.ssh_user {
            validate_posix_login("ssh_user.name", &user.name)?;
            require_non_empty("ssh_user.public_key", &user.public_key)?;
            if !logins.insert(user.name.as_str()) {
                return Err(Error::validation(
                    "ssh_user.name",
                    format!("duplicate SSH user `{}`", user.name),
                ));
            }
        }
        for dns in &self.dns_server {
            validate_ip("dns_server", dns)?;
        }
        for ntp in &self.ntp_server {
            require_non_empty("ntp_server", ntp)?;
        }
        for host in &self.allowed_host {
            validate_ip("allowed_host.address", &host.address)?;
            validate_mask_bits("allowed_host.mask_bits", host.mask_bits)?;
        }
        Ok(())
    }
}

impl AccessProfileSpec {
    /// Whether anything other than the lock bit differs from `desired`.
    fn differs_from(&self, desired: &Self) -> bool {
        let mut normalised = desired.clone();
        normalised.lock = self.lock;
        if normalised.organization_id.is_none() {
            normalised.organization_id.clone_from(&self.organization_id);
        }
        *self != normalised
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessProfileComputed {
    pub organization_name: String,
    /// Projects using this profile.
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
    is_locked: bool,
    #[serde(default)]
    http_proxy: Option<String>,
    #[serde(default)]
    ssh_users: Vec<SshUserRow>,
    #[serde(default)]
    dns_servers: Vec<AddressRow>,
    #[serde(default)]
    ntp_servers: Vec<AddressRow>,
    #[serde(default)]
    allowed_hosts: Vec<AllowedHostRow>,
    #[serde(default)]
    projects: Vec<ProjectRef>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SshUserRow {
    id: i32,
    name: String,
    ssh_public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AddressRow {
    id: i32,
    address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedHostRow {
    id: i32,
    address: String,
    mask_bits: u8,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectRef {
    id: i32,
}

impl SshUserRow {
    fn member(&self) -> SshUser {
        SshUser {
            name: self.name.clone(),
            public_key: self.ssh_public_key.clone(),
        }
    }
}

impl AllowedHostRow {
    fn member(&self) -> AllowedHost {
        AllowedHost {
            address: self.address.clone(),
            mask_bits: self.mask_bits,
            description: self.description.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_proxy: Option<&'a str>,
    ssh_users: Vec<Map<String, Value>>,
    dns_servers: Vec<Map<String, Value>>,
    ntp_servers: Vec<Map<String, Value>>,
    allowed_hosts: Vec<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    name: &'a str,
    http_proxy: Option<&'a str>,
}

fn observe(row: Row) -> Observed<AccessProfileSpec, AccessProfileComputed> {
    let spec = AccessProfileSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        http_proxy: row.http_proxy.filter(|p| !p.is_empty()),
        ssh_user: row.ssh_users.iter().map(SshUserRow::member).collect(),
        dns_server: row.dns_servers.into_iter().map(|d| d.address).collect(),
        ntp_server: row.ntp_servers.into_iter().map(|n| n.address).collect(),
        allowed_host: row.allowed_hosts.iter().map(AllowedHostRow::member).collect(),
    };
    let computed = AccessProfileComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        project_ids: row.projects.iter().map(|p| p.id.to_string()).collect(),
        audit: row.audit,
    };
    Observed::new(row.id, spec, computed)
}

// =========================================================================
// Reconciler
// =========================================================================

pub struct AccessProfiles {
    platform: Platform,
}

impl AccessProfiles {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Row> {
        let rows: Vec<Row> = self.platform.list_by_id("/AccessProfiles/list", id).await?;
        expect_one(rows, Self::KIND, &id.to_string(), after_op, |r| r.id == id)
    }

    async fn apply(&self, id: i32, row: &Row, desired: &AccessProfileSpec) -> Result<()> {
        let proxy = desired.http_proxy.as_deref().filter(|p| !p.is_empty());
        if row.name != desired.name || row.http_proxy.as_deref().filter(|p| !p.is_empty()) != proxy {
            let body = UpdateBody {
                name: &desired.name,
                http_proxy: proxy,
            };
            self.platform
                .client()
                .put_unit(&format!("/AccessProfiles/update/{id}"), &body)
                .await?;
        }

        let ssh = MemberRows {
            platform: &self.platform,
            relation: "access profile SSH users",
            create_path: "/SshUsers/create",
            delete_prefix: "/SshUsers",
            parent_field: "accessProfileId",
            parent: id,
            observed: row
                .ssh_users
                .iter()
                .map(|u| Binding::new(Some(u.id), u.member()))
                .collect(),
        };
        reconcile_bindings(&ssh, &desired.ssh_user).await?;

        let dns = MemberRows {
            platform: &self.platform,
            relation: "access profile DNS servers",
            create_path: "/DnsServers/create",
            delete_prefix: "/DnsServers",
            parent_field: "accessProfileId",
            parent: id,
            observed: address_bindings(&row.dns_servers),
        };
        reconcile_bindings(&dns, &desired.dns_server).await?;

        let ntp = MemberRows {
            platform: &self.platform,
            relation: "access profile NTP servers",
            create_path: "/NtpServers/create",
            delete_prefix: "/NtpServers",
            parent_field: "accessProfileId",
            parent: id,
            observed: address_bindings(&row.ntp_servers),
        };
        reconcile_bindings(&ntp, &desired.ntp_server).await?;

        let hosts = MemberRows {
            platform: &self.platform,
            relation: "access profile allowed hosts",
            create_path: "/AllowedHost/create",
            delete_prefix: "/AllowedHost/delete",
            parent_field: "accessProfileId",
            parent: id,
            observed: row
                .allowed_hosts
                .iter()
                .map(|h| Binding::new(Some(h.id), h.member()))
                .collect(),
        };
        reconcile_bindings(&hosts, &desired.allowed_host).await?;
        Ok(())
    }
}

fn address_bindings(rows: &[AddressRow]) -> Vec<Binding<String>> {
    rows.iter()
        .map(|r| Binding::new(Some(r.id), r.address.clone()))
        .collect()
}

#[async_trait]
impl LockTarget for AccessProfiles {
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
impl Reconciler for AccessProfiles {
    type Spec = AccessProfileSpec;
    type Computed = AccessProfileComputed;

    const KIND: &'static str = "access profile";

    async fn create(&self, desired: &AccessProfileSpec) -> Result<Observed<AccessProfileSpec, AccessProfileComputed>> {
        desired.validate()?;
        let body = CreateBody {
            name: &desired.name,
            organization_id: parse_optional_id(desired.organization_id.as_deref())?,
            http_proxy: desired.http_proxy.as_deref().filter(|p| !p.is_empty()),
            ssh_users: desired.ssh_user.iter().map(MemberWire::wire).collect(),
            dns_servers: desired.dns_server.iter().map(MemberWire::wire).collect(),
            ntp_servers: desired.ntp_server.iter().map(MemberWire::wire).collect(),
            allowed_hosts: desired.allowed_host.iter().map(MemberWire::wire).collect(),
        };
        let created: Created = self.platform.client().post("/AccessProfiles/create", &body).await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, "Created");

        if desired.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || async { Ok(observe(self.fetch(id, true).await?)) })
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<AccessProfileSpec, AccessProfileComputed>> {
        let id = parse_entity_id(id)?;
        Ok(observe(self.fetch(id, false).await?))
    }

    async fn update(
        &self,
        id: &str,
        desired: &AccessProfileSpec,
    ) -> Result<Observed<AccessProfileSpec, AccessProfileComputed>> {
        desired.validate()?;
        let id = parse_entity_id(id)?;
        let row = self.fetch(id, false).await?;
        let current = observe(row.clone());
        if desired.organization_id.is_some() && desired.organization_id != current.spec.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }

        let has_changes = current.spec.differs_from(desired);
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
            .delete_ignoring_missing(&format!("/AccessProfiles/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row() -> Row {
        serde_json::from_value(json!({
            "id": 5,
            "name": "edge",
            "organizationId": 2,
            "organizationName": "acme",
            "isLocked": true,
            "httpProxy": "",
            "sshUsers": [{"id": 31, "name": "deploy", "sshPublicKey": "ssh-ed25519 AAAA"}],
            "dnsServers": [{"id": 41, "address": "8.8.8.8"}],
            "ntpServers": [{"id": 51, "address": "time.windows.com"}],
            "allowedHosts": [{"id": 61, "address": "10.0.0.0", "maskBits": 24, "description": null}],
            "projects": [{"id": 9, "name": "p"}],
            "createdBy": "ops"
        }))
        .unwrap()
    }

    #[test]
    fn observe_translates_platform_row() {
        let rec = observe(row());
        assert_eq!(rec.id, "5");
        assert_eq!(rec.spec.organization_id.as_deref(), Some("2"));
        assert!(rec.spec.lock);
        assert_eq!(rec.spec.http_proxy, None);
        assert!(rec.spec.ssh_user.contains(&SshUser {
            name: "deploy".into(),
            public_key: "ssh-ed25519 AAAA".into(),
        }));
        assert!(rec.spec.dns_server.contains("8.8.8.8"));
        assert_eq!(rec.computed.project_ids, vec!["9"]);
        assert_eq!(rec.computed.audit.created_by.as_deref(), Some("ops"));
    }

    #[test]
    fn lock_only_change_is_not_a_field_change() {
        let current = observe(row()).spec;
        let mut desired = current.clone();
        desired.lock = false;
        desired.organization_id = None;
        assert!(!current.differs_from(&desired));
        desired.name = "edge-2".into();
        assert!(current.differs_from(&desired));
    }

    #[test]
    fn ubuntu_ssh_user_is_rejected() {
        let mut spec = AccessProfileSpec {
            name: "edge".into(),
            ..AccessProfileSpec::default()
        };
        spec.ssh_user.insert(SshUser {
            name: "ubuntu".into(),
            public_key: "k".into(),
        });
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("ssh_user.name"));
    }

    #[test]
    fn allowed_host_mask_is_checked() {
        let mut spec = AccessProfileSpec {
            name: "edge".into(),
            ..AccessProfileSpec::default()
        };
        spec.allowed_host.insert(AllowedHost {
            address: "10.0.0.0".into(),
            mask_bits: 40,
            description: String::new(),
        });
        assert!(spec.validate().is_err());
    }
}
