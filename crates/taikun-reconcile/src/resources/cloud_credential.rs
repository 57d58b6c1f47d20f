//! Cloud credentials. One envelope (name, organization, lock) around a
//! provider-specific body; the provider tag picks the create and update
//! endpoints and is fixed once the credential exists.
//!
//! Provider fields that the desired record leaves unset are filled from the
//! environment (`AWS_ACCESS_KEY_ID`, `OS_PASSWORD`, `ARM_TENANT_ID`, ...)
//! before validation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use taikun_client::Created;
use taikun_core::id::{parse_entity_id, parse_optional_id};
use taikun_core::validate::{require_non_empty, validate_name, validate_url};
use taikun_core::{Error, Result, Validate};

use crate::lock::{LockTarget, mediate, release_for_delete};
use crate::platform::{Platform, expect_one};
use crate::reconciler::{Audit, Observed, Reconciler};
use crate::wait::Operation;

const RESOURCE: &str = "CloudCredentials";

/// Environment lookup used for provider defaults.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

// =========================================================================
// Cloud type
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudType {
    Aws,
    Azure,
    Gcp,
    Openstack,
    Proxmox,
    Vsphere,
}

impl CloudType {
    /// Controller segment of the provider's endpoints (`Aws/create`, `Flavors/Aws/{id}`).
    pub const fn segment(self) -> &'static str {
        match self {
            Self::Aws => "Aws",
            Self::Azure => "Azure",
            Self::Gcp => "Gcp",
            Self::Openstack => "Openstack",
            Self::Proxmox => "Proxmox",
            Self::Vsphere => "Vsphere",
        }
    }

    pub fn from_platform(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" | "google" => Ok(Self::Gcp),
            "openstack" => Ok(Self::Openstack),
            "proxmox" => Ok(Self::Proxmox),
            "vsphere" => Ok(Self::Vsphere),
            other => Err(Error::Inconsistent(format!("unknown cloud type `{other}`"))),
        }
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

// =========================================================================
// Desired state
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentialSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub lock: bool,
    #[serde(flatten)]
    pub cloud: CloudSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cloud_type", rename_all = "lowercase")]
pub enum CloudSpec {
    Aws(AwsSpec),
    Azure(AzureSpec),
    Gcp(GcpSpec),
    Openstack(OpenstackSpec),
    Proxmox(ProxmoxSpec),
    Vsphere(VsphereSpec),
}

const fn default_az_count() -> i32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsSpec {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
    pub region: String,
    #[serde(default = "default_az_count")]
    pub az_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSpec {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub location: String,
    #[serde(default = "default_az_count")]
    pub az_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpSpec {
    /// Path of the service-account JSON file; only read on create.
    #[serde(default, skip_serializing)]
    pub config_file: Option<String>,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackSpec {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub domain: String,
    pub project_name: String,
    pub region: String,
    pub public_network_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxmoxSpec {
    pub url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub storage: String,
    pub vm_template_name: String,
    #[serde(default)]
    pub hypervisors: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsphereSpec {
    pub url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub datacenter_name: String,
    pub resource_pool: String,
    pub datastore: String,
    pub vm_template_name: String,
    #[serde(default)]
    pub hypervisors: BTreeSet<String>,
}

/// Fill `slot` from `var` when unset.
fn fill(slot: &mut Option<String>, env: &EnvLookup, var: &str) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(value) = env(var) {
            debug!(var, "Using environment default");
            *slot = Some(value);
        }
    }
}

fn required<'a>(slot: Option<&'a String>, path: &str, var: &str) -> Result<&'a str> {
    slot.map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(path, format!("required; set it or export {var}")))
}

impl CloudSpec {
    pub const fn cloud_type(&self) -> CloudType {
        match self {
            Self::Aws(_) => CloudType::Aws,
            Self::Azure(_) => CloudType::Azure,
            Self::Gcp(_) => CloudType::Gcp,
            Self::Openstack(_) => CloudType::Openstack,
            Self::Proxmox(_) => CloudType::Proxmox,
            Self::Vsphere(_) => CloudType::Vsphere,
        }
    }

    /// Apply environment defaults to fields the caller left unset.
    pub fn apply_env_defaults(&mut self, env: &EnvLookup) {
        match self {
            Self::Aws(s) => {
                fill(&mut s.access_key_id, env, "AWS_ACCESS_KEY_ID");
                fill(&mut s.secret_access_key, env, "AWS_SECRET_ACCESS_KEY");
            }
            Self::Azure(s) => {
                fill(&mut s.client_id, env, "ARM_CLIENT_ID");
                fill(&mut s.client_secret, env, "ARM_CLIENT_SECRET");
                fill(&mut s.subscription_id, env, "ARM_SUBSCRIPTION_ID");
                fill(&mut s.tenant_id, env, "ARM_TENANT_ID");
            }
            Self::Gcp(s) => fill(&mut s.config_file, env, "GOOGLE_APPLICATION_CREDENTIALS"),
            Self::Openstack(s) => {
                fill(&mut s.user, env, "OS_USERNAME");
                fill(&mut s.password, env, "OS_PASSWORD");
                fill(&mut s.url, env, "OS_AUTH_URL");
            }
            Self::Proxmox(_) | Self::Vsphere(_) => {}
        }
    }

    /// Every field still unset after environment defaults, checked as on create.
    fn validate_resolved(&self) -> Result<()> {
        match self {
            Self::Aws(s) => {
                required(s.access_key_id.as_ref(), "access_key_id", "AWS_ACCESS_KEY_ID")?;
                required(s.secret_access_key.as_ref(), "secret_access_key", "AWS_SECRET_ACCESS_KEY")?;
                require_non_empty("region", &s.region)?;
                validate_az_count(s.az_count)
            }
            Self::Azure(s) => {
                required(s.client_id.as_ref(), "client_id", "ARM_CLIENT_ID")?;
                required(s.client_secret.as_ref(), "client_secret", "ARM_CLIENT_SECRET")?;
                required(s.subscription_id.as_ref(), "subscription_id", "ARM_SUBSCRIPTION_ID")?;
                required(s.tenant_id.as_ref(), "tenant_id", "ARM_TENANT_ID")?;
                require_non_empty("location", &s.location)?;
                validate_az_count(s.az_count)
            }
            Self::Gcp(s) => {
                required(s.config_file.as_ref(), "config_file", "GOOGLE_APPLICATION_CREDENTIALS")?;
                require_non_empty("region", &s.region)
            }
            Self::Openstack(s) => {
                required(s.user.as_ref(), "user", "OS_USERNAME")?;
                required(s.password.as_ref(), "password", "OS_PASSWORD")?;
                validate_url("url", required(s.url.as_ref(), "url", "OS_AUTH_URL")?)?;
                require_non_empty("domain", &s.domain)?;
                require_non_empty("project_name", &s.project_name)?;
                require_non_empty("region", &s.region)?;
                require_non_empty("public_network_name", &s.public_network_name)
            }
            Self::Proxmox(s) => {
                validate_url("url", &s.url)?;
                require_non_empty("username", &s.username)?;
                if s.password.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation("password", "required"));
                }
                require_non_empty("storage", &s.storage)?;
                require_non_empty("vm_template_name", &s.vm_template_name)
            }
            Self::Vsphere(s) => {
                validate_url("url", &s.url)?;
                require_non_empty("username", &s.username)?;
                if s.password.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation("password", "required"));
                }
                require_non_empty("datacenter_name", &s.datacenter_name)?;
                require_non_empty("resource_pool", &s.resource_pool)?;
                require_non_empty("datastore", &s.datastore)?;
                require_non_empty("vm_template_name", &s.vm_template_name)
            }
        }
    }

    /// First field that differs from `observed` and cannot be updated.
    fn immutable_change(&self, observed: &Self) -> Option<&'static str> {
        match (self, observed) {
            (Self::Aws(d), Self::Aws(o)) => {
                (d.region != o.region || d.az_count != o.az_count).then_some("region")
            }
            (Self::Azure(d), Self::Azure(o)) => (d.location != o.location
                || d.az_count != o.az_count
                || d.subscription_id != o.subscription_id
                || d.tenant_id != o.tenant_id)
                .then_some("location"),
            (Self::Gcp(d), Self::Gcp(o)) => (d.region != o.region
                || d.billing_account_id != o.billing_account_id
                || d.folder_id != o.folder_id)
                .then_some("region"),
            (Self::Openstack(d), Self::Openstack(o)) => (d.url != o.url
                || d.domain != o.domain
                || d.project_name != o.project_name
                || d.region != o.region
                || d.public_network_name != o.public_network_name
                || d.availability_zone != o.availability_zone)
                .then_some("project_name"),
            (Self::Proxmox(d), Self::Proxmox(o)) => (d.url != o.url
                || d.storage != o.storage
                || d.vm_template_name != o.vm_template_name
                || d.hypervisors != o.hypervisors)
                .then_some("url"),
            (Self::Vsphere(d), Self::Vsphere(o)) => (d.url != o.url
                || d.datacenter_name != o.datacenter_name
                || d.resource_pool != o.resource_pool
                || d.datastore != o.datastore
                || d.vm_template_name != o.vm_template_name
                || d.hypervisors != o.hypervisors)
                .then_some("url"),
            _ => Some("cloud_type"),
        }
    }

    /// Whether the updatable identity (key id, user name) differs.
    fn identity_changed(&self, observed: &Self) -> bool {
        match (self, observed) {
            (Self::Aws(d), Self::Aws(o)) => d.access_key_id != o.access_key_id,
            (Self::Azure(d), Self::Azure(o)) => d.client_id != o.client_id,
            (Self::Openstack(d), Self::Openstack(o)) => d.user != o.user,
            (Self::Proxmox(d), Self::Proxmox(o)) => d.username != o.username,
            (Self::Vsphere(d), Self::Vsphere(o)) => d.username != o.username,
            _ => false,
        }
    }

    /// Provider fields of the create body. `config` is the GCP file content.
    fn create_fields(&self, config: Option<&str>) -> Map<String, Value> {
        let value = match self {
            Self::Aws(s) => json!({
                "awsAccessKeyId": s.access_key_id,
                "awsSecretAccessKey": s.secret_access_key,
                "awsRegion": s.region,
                "azCount": s.az_count,
            }),
            Self::Azure(s) => json!({
                "azureClientId": s.client_id,
                "azureClientSecret": s.client_secret,
                "azureSubscriptionId": s.subscription_id,
                "azureTenantId": s.tenant_id,
                "azureLocation": s.location,
                "azCount": s.az_count,
            }),
            Self::Gcp(s) => json!({
                "config": config,
                "region": s.region,
                "billingAccountId": s.billing_account_id,
                "folderId": s.folder_id,
            }),
            Self::Openstack(s) => json!({
                "openStackUser": s.user,
                "openStackPassword": s.password,
                "openStackUrl": s.url,
                "openStackDomain": s.domain,
                "openStackProject": s.project_name,
                "openStackRegion": s.region,
                "openStackPublicNetwork": s.public_network_name,
                "openStackAvailabilityZone": s.availability_zone,
            }),
            Self::Proxmox(s) => json!({
                "url": s.url,
                "username": s.username,
                "password": s.password,
                "storage": s.storage,
                "vmTemplateName": s.vm_template_name,
                "hypervisors": s.hypervisors,
            }),
            Self::Vsphere(s) => json!({
                "url": s.url,
                "username": s.username,
                "password": s.password,
                "datacenterName": s.datacenter_name,
                "resourcePool": s.resource_pool,
                "datastore": s.datastore,
                "vmTemplateName": s.vm_template_name,
                "hypervisors": s.hypervisors,
            }),
        };
        into_map(value)
    }

    /// Provider fields of the update body: identity plus secret.
    fn update_fields(&self) -> Map<String, Value> {
        let value = match self {
            Self::Aws(s) => json!({
                "awsAccessKeyId": s.access_key_id,
                "awsSecretAccessKey": s.secret_access_key,
            }),
            Self::Azure(s) => json!({
                "azureClientId": s.client_id,
                "azureClientSecret": s.client_secret,
            }),
            Self::Gcp(_) => json!({}),
            Self::Openstack(s) => json!({
                "openStackUser": s.user,
                "openStackPassword": s.password,
            }),
            Self::Proxmox(ProxmoxSpec { username, password, .. })
            | Self::Vsphere(VsphereSpec { username, password, .. }) => json!({
                "username": username,
                "password": password,
            }),
        };
        into_map(value)
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Map::new(),
    }
}

fn validate_az_count(count: i32) -> Result<()> {
    if (1..=3).contains(&count) {
        Ok(())
    } else {
        Err(Error::validation("az_count", format!("must be 1..=3, got {count}")))
    }
}

impl Validate for CloudCredentialSpec {
    fn validate(&self) -> Result<()> {
        validate_name("name", &self.name, 3, 30)?;
        parse_optional_id(self.organization_id.as_deref())?;
        self.cloud.validate_resolved()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloudCredentialComputed {
    pub organization_name: String,
    pub is_default: bool,
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
    cloud_type: String,
    #[serde(default)]
    organization_id: Option<i32>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    is_locked: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    az_count: Option<i32>,
    #[serde(default)]
    aws_access_key_id: Option<String>,
    #[serde(default)]
    azure_client_id: Option<String>,
    #[serde(default)]
    azure_subscription_id: Option<String>,
    #[serde(default)]
    azure_tenant_id: Option<String>,
    #[serde(default)]
    azure_location: Option<String>,
    #[serde(default)]
    billing_account_id: Option<String>,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    open_stack_user: Option<String>,
    #[serde(default)]
    open_stack_url: Option<String>,
    #[serde(default)]
    open_stack_domain: Option<String>,
    #[serde(default)]
    open_stack_project: Option<String>,
    #[serde(default)]
    open_stack_public_network: Option<String>,
    #[serde(default)]
    open_stack_availability_zone: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    vm_template_name: Option<String>,
    #[serde(default)]
    datacenter_name: Option<String>,
    #[serde(default)]
    resource_pool: Option<String>,
    #[serde(default)]
    datastore: Option<String>,
    #[serde(default)]
    hypervisors: Vec<String>,
    #[serde(default)]
    projects: Vec<ProjectRef>,
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectRef {
    id: i32,
}

fn observe(row: Row) -> Result<Observed<CloudCredentialSpec, CloudCredentialComputed>> {
    let region = row.region.unwrap_or_default();
    let az_count = row.az_count.unwrap_or_else(default_az_count);
    let hypervisors: BTreeSet<String> = row.hypervisors.into_iter().collect();
    let cloud = match CloudType::from_platform(&row.cloud_type)? {
        CloudType::Aws => CloudSpec::Aws(AwsSpec {
            access_key_id: row.aws_access_key_id,
            secret_access_key: None,
            region,
            az_count,
        }),
        CloudType::Azure => CloudSpec::Azure(AzureSpec {
            client_id: row.azure_client_id,
            client_secret: None,
            subscription_id: row.azure_subscription_id,
            tenant_id: row.azure_tenant_id,
            location: row.azure_location.unwrap_or(region),
            az_count,
        }),
        CloudType::Gcp => CloudSpec::Gcp(GcpSpec {
            config_file: None,
            region,
            billing_account_id: row.billing_account_id,
            folder_id: row.folder_id,
        }),
        CloudType::Openstack => CloudSpec::Openstack(OpenstackSpec {
            user: row.open_stack_user,
            password: None,
            url: row.open_stack_url,
            domain: row.open_stack_domain.unwrap_or_default(),
            project_name: row.open_stack_project.unwrap_or_default(),
            region,
            public_network_name: row.open_stack_public_network.unwrap_or_default(),
            availability_zone: row.open_stack_availability_zone,
        }),
        CloudType::Proxmox => CloudSpec::Proxmox(ProxmoxSpec {
            url: row.url.unwrap_or_default(),
            username: row.username.unwrap_or_default(),
            password: None,
            storage: row.storage.unwrap_or_default(),
            vm_template_name: row.vm_template_name.unwrap_or_default(),
            hypervisors,
        }),
        CloudType::Vsphere => CloudSpec::Vsphere(VsphereSpec {
            url: row.url.unwrap_or_default(),
            username: row.username.unwrap_or_default(),
            password: None,
            datacenter_name: row.datacenter_name.unwrap_or_default(),
            resource_pool: row.resource_pool.unwrap_or_default(),
            datastore: row.datastore.unwrap_or_default(),
            vm_template_name: row.vm_template_name.unwrap_or_default(),
            hypervisors,
        }),
    };
    let spec = CloudCredentialSpec {
        name: row.name,
        organization_id: row.organization_id.map(|o| o.to_string()),
        lock: row.is_locked,
        cloud,
    };
    let computed = CloudCredentialComputed {
        organization_name: row.organization_name.unwrap_or_default(),
        is_default: row.is_default,
        project_ids: row.projects.iter().map(|p| p.id.to_string()).collect(),
        audit: row.audit,
    };
    Ok(Observed::new(row.id, spec, computed))
}

async fn fetch_row(platform: &Platform, id: i32, after_op: bool) -> Result<Row> {
    let rows: Vec<Row> = platform.list_by_id("/CloudCredentials/list", id).await?;
    expect_one(rows, CloudCredentials::KIND, &id.to_string(), after_op, |r| r.id == id)
}

/// Provider of an existing credential, for the catalog queries.
pub async fn cloud_type_of(platform: &Platform, id: i32) -> Result<CloudType> {
    CloudType::from_platform(&fetch_row(platform, id, false).await?.cloud_type)
}

// =========================================================================
// Reconciler
// =========================================================================

pub struct CloudCredentials {
    platform: Platform,
    env: EnvLookup,
}

impl CloudCredentials {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            env: process_env(),
        }
    }

    /// Replace the environment used for provider defaults.
    #[must_use]
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    fn resolve(&self, desired: &CloudCredentialSpec) -> Result<CloudCredentialSpec> {
        let mut resolved = desired.clone();
        resolved.cloud.apply_env_defaults(&self.env);
        resolved.validate()?;
        Ok(resolved)
    }

    async fn fetch(&self, id: i32, after_op: bool) -> Result<Observed<CloudCredentialSpec, CloudCredentialComputed>> {
        observe(fetch_row(&self.platform, id, after_op).await?)
    }

    async fn apply(&self, id: i32, resolved: &CloudCredentialSpec) -> Result<()> {
        let mut body = resolved.cloud.update_fields();
        body.insert("id".into(), json!(id));
        body.insert("name".into(), json!(resolved.name));
        let path = format!("/{}/update", resolved.cloud.cloud_type().segment());
        self.platform.client().put_unit(&path, &body).await
    }
}

#[async_trait]
impl LockTarget for CloudCredentials {
    fn lock_kind(&self) -> &'static str {
        Self::KIND
    }

    async fn observed_lock(&self, id: i32) -> Result<bool> {
        Ok(fetch_row(&self.platform, id, false).await?.is_locked)
    }

    async fn set_lock(&self, id: i32, locked: bool) -> Result<()> {
        self.platform.set_lock(RESOURCE, id, locked).await
    }
}

#[async_trait]
impl Reconciler for CloudCredentials {
    type Spec = CloudCredentialSpec;
    type Computed = CloudCredentialComputed;

    const KIND: &'static str = "cloud credential";

    async fn create(
        &self,
        desired: &CloudCredentialSpec,
    ) -> Result<Observed<CloudCredentialSpec, CloudCredentialComputed>> {
        let resolved = self.resolve(desired)?;
        let config = match &resolved.cloud {
            CloudSpec::Gcp(GcpSpec {
                config_file: Some(path),
                ..
            }) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::validation("config_file", format!("cannot read `{path}`: {e}")))?,
            ),
            _ => None,
        };
        let cloud_type = resolved.cloud.cloud_type();
        let mut body = resolved.cloud.create_fields(config.as_deref());
        body.insert("name".into(), json!(resolved.name));
        if let Some(org) = parse_optional_id(resolved.organization_id.as_deref())? {
            body.insert("organizationId".into(), json!(org));
        }
        let created: Created = self
            .platform
            .client()
            .post(&format!("/{}/create", cloud_type.segment()), &body)
            .await?;
        let id = created.id()?;
        info!(kind = Self::KIND, id, %cloud_type, "Created");
        if resolved.lock {
            self.set_lock(id, true).await?;
        }
        self.platform
            .read_after(Operation::Create, || self.fetch(id, true))
            .await
    }

    async fn read(&self, id: &str) -> Result<Observed<CloudCredentialSpec, CloudCredentialComputed>> {
        self.fetch(parse_entity_id(id)?, false).await
    }

    async fn update(
        &self,
        id: &str,
        desired: &CloudCredentialSpec,
    ) -> Result<Observed<CloudCredentialSpec, CloudCredentialComputed>> {
        let resolved = self.resolve(desired)?;
        let id = parse_entity_id(id)?;
        let current = self.fetch(id, false).await?.spec;
        if let Some(field) = resolved.cloud.immutable_change(&current.cloud) {
            return Err(Error::validation(field, "cannot change after creation"));
        }
        if resolved.organization_id.is_some() && resolved.organization_id != current.organization_id {
            return Err(Error::validation("organization_id", "cannot change after creation"));
        }
        let has_changes = resolved.name != current.name || resolved.cloud.identity_changed(&current.cloud);
        mediate(self, &self.platform, id, resolved.lock, has_changes, || self.apply(id, &resolved)).await?;
        self.platform
            .read_after(Operation::Update, || self.fetch(id, true))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_entity_id(id)?;
        if !release_for_delete(self, &self.platform, id).await? {
            return Ok(());
        }
        self.platform
            .delete_ignoring_missing(&format!("/CloudCredentials/{id}"))
            .await?;
        info!(kind = Self::KIND, id, "Deleted");
        Ok(())
    }
}
