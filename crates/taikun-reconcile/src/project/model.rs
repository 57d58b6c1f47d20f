//! Desired and observed project records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use taikun_core::convert::date_to_rfc3339;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_label_key, validate_name};
use taikun_core::{Error, Result, Validate};

use crate::binding::Label;
use crate::reconciler::Audit;

const fn default_disk_size() -> i64 {
    30
}

/// Kubernetes node role; the number is the platform's role code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Bastion,
    Kubemaster,
    Kubeworker,
}

impl ServerRole {
    pub const ALL: [Self; 3] = [Self::Bastion, Self::Kubemaster, Self::Kubeworker];

    pub const fn code(self) -> i32 {
        match self {
            Self::Bastion => 100,
            Self::Kubemaster => 200,
            Self::Kubeworker => 300,
        }
    }

    /// The platform reports the role as its code or its name.
    pub fn from_platform(raw: &Value) -> Result<Self> {
        let by_code = |code: i64| match code {
            100 => Some(Self::Bastion),
            200 => Some(Self::Kubemaster),
            300 => Some(Self::Kubeworker),
            _ => None,
        };
        let role = match raw {
            Value::Number(n) => n.as_i64().and_then(by_code),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "bastion" => Some(Self::Bastion),
                "kubemaster" => Some(Self::Kubemaster),
                "kubeworker" => Some(Self::Kubeworker),
                other => other.parse().ok().and_then(by_code),
            },
            _ => None,
        };
        role.ok_or_else(|| Error::Inconsistent(format!("unknown server role {raw}")))
    }

    const fn field(self) -> &'static str {
        match self {
            Self::Bastion => "server_bastion",
            Self::Kubemaster => "server_kubemaster",
            Self::Kubeworker => "server_kubeworker",
        }
    }
}

/// One Kubernetes node. Sizes are gibibytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub flavor: String,
    #[serde(default = "default_disk_size")]
    pub disk_size: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub kubernetes_node_label: BTreeSet<Label>,
}

/// One standalone VM. Sizes are gibibytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub flavor: String,
    pub image_id: String,
    pub standalone_profile_id: String,
    #[serde(default = "default_disk_size")]
    pub volume_size: i64,
    #[serde(default)]
    pub public_ip: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    pub cloud_credential_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    /// `dd/mm/yyyy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub auto_upgrade: bool,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_credential_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_profile_id: Option<String>,
    #[serde(default)]
    pub flavors: BTreeSet<String>,
    #[serde(default)]
    pub images: BTreeSet<String>,
    /// Bound user ids; unset leaves the relation alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_cpu_units: Option<i64>,
    /// Gibibytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_ram_size: Option<i64>,
    /// Gibibytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_disk_size: Option<i64>,
    #[serde(default)]
    pub server_bastion: BTreeSet<ServerSpec>,
    #[serde(default)]
    pub server_kubemaster: BTreeSet<ServerSpec>,
    #[serde(default)]
    pub server_kubeworker: BTreeSet<ServerSpec>,
    #[serde(default)]
    pub vm: BTreeSet<VmSpec>,
}

impl ProjectSpec {
    pub fn servers(&self, role: ServerRole) -> &BTreeSet<ServerSpec> {
        match role {
            ServerRole::Bastion => &self.server_bastion,
            ServerRole::Kubemaster => &self.server_kubemaster,
            ServerRole::Kubeworker => &self.server_kubeworker,
        }
    }

    pub fn has_servers(&self) -> bool {
        ServerRole::ALL.iter().any(|r| !self.servers(*r).is_empty())
    }

    /// Copy fields the desired record leaves unmanaged from `observed`, so the
    /// two compare equal when nothing the caller asked for differs.
    pub fn normalised_against(&self, observed: &Self) -> Self {
        let mut n = self.clone();
        n.lock = observed.lock;
        for (slot, seen) in [
            (&mut n.organization_id, &observed.organization_id),
            (&mut n.access_profile_id, &observed.access_profile_id),
            (&mut n.kubernetes_profile_id, &observed.kubernetes_profile_id),
            (&mut n.kubernetes_version, &observed.kubernetes_version),
        ] {
            if slot.is_none() {
                slot.clone_from(seen);
            }
        }
        for (slot, seen) in [
            (&mut n.quota_cpu_units, observed.quota_cpu_units),
            (&mut n.quota_ram_size, observed.quota_ram_size),
            (&mut n.quota_disk_size, observed.quota_disk_size),
        ] {
            if slot.is_none() {
                *slot = seen;
            }
        }
        if n.users.is_none() {
            n.users.clone_from(&observed.users);
        }
        n
    }

    /// First field that differs from `observed` and cannot change in place.
    pub fn immutable_change(&self, observed: &Self) -> Option<&'static str> {
        let n = self.normalised_against(observed);
        if n.cloud_credential_id != observed.cloud_credential_id {
            return Some("cloud_credential_id");
        }
        if n.organization_id != observed.organization_id {
            return Some("organization_id");
        }
        if n.access_profile_id != observed.access_profile_id {
            return Some("access_profile_id");
        }
        if n.kubernetes_profile_id != observed.kubernetes_profile_id {
            return Some("kubernetes_profile_id");
        }
        if n.kubernetes_version != observed.kubernetes_version {
            return Some("kubernetes_version");
        }
        if n.auto_upgrade != observed.auto_upgrade {
            return Some("auto_upgrade");
        }
        if n.server_bastion != observed.server_bastion {
            return Some("server_bastion");
        }
        if n.server_kubemaster != observed.server_kubemaster {
            return Some("server_kubemaster");
        }
        if (n.has_servers() && !observed.vm.is_empty()) || (!n.vm.is_empty() && observed.has_servers()) {
            return Some("vm");
        }
        if renamed_in_place(&n.server_kubeworker, &observed.server_kubeworker, |s| &s.name) {
            return Some("server_kubeworker");
        }
        if renamed_in_place(&n.vm, &observed.vm, |v| &v.name) {
            return Some("vm");
        }
        None
    }
}

/// Whether a member keeps its name but changes any other attribute.
fn renamed_in_place<T: Eq>(desired: &BTreeSet<T>, observed: &BTreeSet<T>, name: impl Fn(&T) -> &String) -> bool {
    let seen: BTreeMap<&String, &T> = observed.iter().map(|o| (name(o), o)).collect();
    desired
        .iter()
        .any(|d| seen.get(name(d)).is_some_and(|o| *o != d))
}

fn validate_server(path: &str, server: &ServerSpec, flavors: &BTreeSet<String>) -> Result<()> {
    validate_name(&format!("{path}.name"), &server.name, 1, 30)?;
    require_non_empty(&format!("{path}.flavor"), &server.flavor)?;
    if !flavors.contains(&server.flavor) {
        return Err(Error::validation(
            format!("{path}.flavor"),
            format!("flavor `{}` is not bound to the project", server.flavor),
        ));
    }
    if server.disk_size <= 0 {
        return Err(Error::validation(format!("{path}.disk_size"), "must be positive"));
    }
    for label in &server.kubernetes_node_label {
        validate_label_key(&format!("{path}.kubernetes_node_label"), &label.key)?;
    }
    Ok(())
}

impl Validate for ProjectSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        parse_entity_id(&self.cloud_credential_id)
            .map_err(|e| Error::validation("cloud_credential_id", e.to_string()))?;
        for (path, id) in [
            ("access_profile_id", &self.access_profile_id),
            ("alerting_profile_id", &self.alerting_profile_id),
            ("kubernetes_profile_id", &self.kubernetes_profile_id),
            ("backup_credential_id", &self.backup_credential_id),
            ("policy_profile_id", &self.policy_profile_id),
        ] {
            parse_optional_id(id.as_deref()).map_err(|e| Error::validation(path, e.to_string()))?;
        }
        if let Some(date) = &self.expiration_date {
            date_to_rfc3339(date).map_err(|e| Error::validation("expiration_date", e.to_string()))?;
        }
        for (path, quota) in [
            ("quota_cpu_units", self.quota_cpu_units),
            ("quota_ram_size", self.quota_ram_size),
            ("quota_disk_size", self.quota_disk_size),
        ] {
            if quota.is_some_and(|q| q < 0) {
                return Err(Error::validation(path, "must not be negative"));
            }
        }

        if self.has_servers() && !self.vm.is_empty() {
            return Err(Error::validation(
                "vm",
                "a project has either Kubernetes servers or standalone VMs, not both",
            ));
        }
        if self.has_servers() {
            if self.server_bastion.len() != 1 {
                return Err(Error::validation("server_bastion", "exactly one bastion is required"));
            }
            if self.server_kubemaster.len() % 2 == 0 {
                return Err(Error::validation(
                    "server_kubemaster",
                    "an odd number of masters (at least one) is required",
                ));
            }
            if self.server_bastion.iter().any(|b| !b.kubernetes_node_label.is_empty()) {
                return Err(Error::validation(
                    "server_bastion.kubernetes_node_label",
                    "bastions cannot carry node labels",
                ));
            }
        }

        let mut names = BTreeSet::new();
        for role in ServerRole::ALL {
            for server in self.servers(role) {
                validate_server(role.field(), server, &self.flavors)?;
                if !names.insert(server.name.as_str()) {
                    return Err(Error::validation(
                        format!("{}.name", role.field()),
                        format!("server name `{}` is used twice", server.name),
                    ));
                }
            }
        }
        for vm in &self.vm {
            validate_name("vm.name", &vm.name, 1, 52)?;
            if !names.insert(vm.name.as_str()) {
                return Err(Error::validation("vm.name", format!("VM name `{}` is used twice", vm.name)));
            }
            if !self.flavors.contains(&vm.flavor) {
                return Err(Error::validation(
                    "vm.flavor",
                    format!("flavor `{}` is not bound to the project", vm.flavor),
                ));
            }
            if !self.images.contains(&vm.image_id) {
                return Err(Error::validation(
                    "vm.image_id",
                    format!("image `{}` is not bound to the project", vm.image_id),
                ));
            }
            parse_entity_id(&vm.standalone_profile_id)
                .map_err(|e| Error::validation("vm.standalone_profile_id", e.to_string()))?;
            if vm.volume_size <= 0 {
                return Err(Error::validation("vm.volume_size", "must be positive"));
            }
        }
        Ok(())
    }
}

/// A server as the platform reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerState {
    pub id: String,
    pub name: String,
    pub role: Option<ServerRole>,
    pub ip_address: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectComputed {
    pub status: String,
    pub health: String,
    pub cloud_type: String,
    pub organization_name: String,
    pub quota_id: Option<String>,
    /// Bastion address for SSH access.
    pub access_ip: Option<String>,
    pub servers: Vec<ServerState>,
    #[serde(flatten)]
    pub audit: Audit,
}
