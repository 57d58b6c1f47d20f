//! Planting, removing and committing servers and standalone VMs.

use tracing::info;

use taikun_core::Result;
use taikun_core::convert::gibi_to_bytes;
use taikun_core::id::parse_entity_id;

use crate::platform::Platform;

use super::model::{ServerRole, ServerSpec, VmSpec};
use super::wire::{CreateServerBody, CreateVmBody, DeleteServersBody, DeleteVmsBody, ProjectIdBody, ServerRow, VmRow};

pub(super) async fn list_servers(platform: &Platform, project: i32) -> Result<Vec<ServerRow>> {
    platform.list(&format!("/Servers/list/{project}"), &[]).await
}

pub(super) async fn list_vms(platform: &Platform, project: i32) -> Result<Vec<VmRow>> {
    platform
        .list("/StandaloneVm/list", &[("ProjectId", project.to_string())])
        .await
}

pub(super) async fn plant_servers<'a>(
    platform: &Platform,
    project: i32,
    role: ServerRole,
    servers: impl IntoIterator<Item = &'a ServerSpec>,
) -> Result<()> {
    for server in servers {
        let body = CreateServerBody {
            project_id: project,
            name: &server.name,
            flavor: &server.flavor,
            disk_size: gibi_to_bytes(server.disk_size),
            role: role.code(),
            count: 1,
            kubernetes_node_labels: server.kubernetes_node_label.iter().collect(),
        };
        platform.client().post_unit("/Servers/create", &body).await?;
        info!(project, server = %server.name, ?role, "Planted server");
    }
    Ok(())
}

pub(super) async fn delete_servers(platform: &Platform, project: i32, ids: &[i32]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    info!(project, count = ids.len(), "Deleting servers");
    let body = DeleteServersBody {
        project_id: project,
        server_ids: ids,
    };
    platform.client().delete_with_body("/Servers/delete", &body).await
}

pub(super) async fn plant_vms<'a>(
    platform: &Platform,
    project: i32,
    vms: impl IntoIterator<Item = &'a VmSpec>,
) -> Result<()> {
    for vm in vms {
        let body = CreateVmBody {
            project_id: project,
            name: &vm.name,
            flavor_name: &vm.flavor,
            image_id: &vm.image_id,
            standalone_profile_id: parse_entity_id(&vm.standalone_profile_id)?,
            volume_size: vm.volume_size,
            public_ip_enabled: vm.public_ip,
        };
        platform.client().post_unit("/StandaloneVm/create", &body).await?;
        info!(project, vm = %vm.name, "Planted VM");
    }
    Ok(())
}

pub(super) async fn delete_vms(platform: &Platform, project: i32, ids: &[i32]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    info!(project, count = ids.len(), "Deleting VMs");
    let body = DeleteVmsBody {
        project_id: project,
        vm_ids: ids,
    };
    platform.client().delete_with_body("/StandaloneVm/delete", &body).await
}

/// Apply planted and removed servers or VMs.
pub(super) async fn commit(platform: &Platform, project: i32, standalone: bool) -> Result<()> {
    info!(project, standalone, "Committing");
    if standalone {
        platform
            .client()
            .post_unit("/StandaloneVm/commit", &ProjectIdBody { project_id: project })
            .await
    } else {
        platform
            .client()
            .post_unit(&format!("/Projects/commit/{project}"), &serde_json::json!({}))
            .await
    }
}
