//! Read-only catalog queries against a cloud credential: flavors and images.

use serde::{Deserialize, Serialize};
use tracing::debug;

use taikun_core::Result;
use taikun_core::convert::{bytes_to_gibi, mebi_to_gibi};

use crate::platform::Platform;
use crate::resources::cloud_credential::{CloudType, cloud_type_of};

/// A flavor with RAM in gibibytes whatever the provider reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flavor {
    pub name: String,
    pub cpu: i32,
    pub ram_gib: i64,
}

/// Inclusive bounds; `None` leaves a side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FlavorFilter {
    #[serde(default)]
    pub min_cpu: Option<i32>,
    #[serde(default)]
    pub max_cpu: Option<i32>,
    #[serde(default)]
    pub min_ram_gib: Option<i64>,
    #[serde(default)]
    pub max_ram_gib: Option<i64>,
}

impl FlavorFilter {
    pub fn matches(&self, flavor: &Flavor) -> bool {
        self.min_cpu.is_none_or(|m| flavor.cpu >= m)
            && self.max_cpu.is_none_or(|m| flavor.cpu <= m)
            && self.min_ram_gib.is_none_or(|m| flavor.ram_gib >= m)
            && self.max_ram_gib.is_none_or(|m| flavor.ram_gib <= m)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FlavorRow {
    name: String,
    cpu: i32,
    ram: i64,
}

/// RAM as a provider reports it, in gibibytes.
pub const fn normalise_ram(cloud: CloudType, ram: i64) -> i64 {
    match cloud {
        CloudType::Gcp => bytes_to_gibi(ram),
        _ => mebi_to_gibi(ram),
    }
}

pub async fn flavors(platform: &Platform, credential_id: i32, filter: &FlavorFilter) -> Result<Vec<Flavor>> {
    let cloud = cloud_type_of(platform, credential_id).await?;
    let rows: Vec<FlavorRow> = platform
        .list(&format!("/Flavors/{}/{credential_id}", cloud.segment()), &[])
        .await?;
    let total = rows.len();
    let flavors: Vec<Flavor> = rows
        .into_iter()
        .map(|r| Flavor {
            name: r.name,
            cpu: r.cpu,
            ram_gib: normalise_ram(cloud, r.ram),
        })
        .filter(|f| filter.matches(f))
        .collect();
    debug!(credential_id, %cloud, total, kept = flavors.len(), "Listed flavors");
    Ok(flavors)
}

pub async fn images(platform: &Platform, credential_id: i32) -> Result<Vec<Image>> {
    let cloud = cloud_type_of(platform, credential_id).await?;
    platform
        .list(&format!("/Images/{}/{credential_id}", cloud.segment()), &[])
        .await
}
