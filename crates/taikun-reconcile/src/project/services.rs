//! Project services that are switched on and off rather than updated:
//! monitoring, backup, the policy gatekeeper and the alerting profile.
//!
//! Moving backup or policy from one credential/profile to another is never a
//! single call. The old one is disabled, the sub-flag is awaited until it
//! reads `false`, the project is awaited back to `Ready`, and only then is the
//! new one enabled.

use std::time::Duration;

use tracing::info;

use taikun_core::Result;

use crate::platform::Platform;
use crate::wait::StatusSpec;

use super::fetch_row;
use super::wire::{AlertingBody, BackupBody, GatekeeperBody, ProjectIdBody, ProjectRow};

pub(super) const READY: &str = "Ready";

/// Statuses a project passes through on its way back to `Ready`.
pub(super) const TRANSITIONAL: &[&str] = &[
    "Pending",
    "Updating",
    "Upgrading",
    "PendingUpgrade",
    "EnableMonitoring",
    "DisableMonitoring",
    "EnableBackup",
    "DisableBackup",
    "EnableGatekeeper",
    "DisableGatekeeper",
];

pub(super) async fn wait_ready(platform: &Platform, project: i32, deadline: Duration) -> Result<()> {
    let spec = StatusSpec {
        what: format!("project {project}"),
        target: &[READY],
        transitional: TRANSITIONAL,
        deadline,
    };
    let poller = platform.clone();
    platform
        .wait_for(&spec, move || {
            let platform = poller.clone();
            async move { Ok(fetch_row(&platform, project, false).await?.status) }
        })
        .await?;
    Ok(())
}

/// Wait until `flag` of the project row reads `target`.
async fn wait_flag(
    platform: &Platform,
    project: i32,
    name: &str,
    flag: fn(&ProjectRow) -> bool,
    target: bool,
) -> Result<()> {
    let target_str = target.to_string();
    let other = (!target).to_string();
    let targets = [target_str.as_str()];
    let transitional = [other.as_str()];
    let spec = StatusSpec {
        what: format!("project {project} {name}"),
        target: &targets,
        transitional: &transitional,
        deadline: platform.policy().toggle,
    };
    let poller = platform.clone();
    platform
        .wait_for(&spec, move || {
            let platform = poller.clone();
            async move { Ok(flag(&fetch_row(&platform, project, false).await?).to_string()) }
        })
        .await?;
    Ok(())
}

pub(super) async fn reconcile_monitoring(platform: &Platform, project: i32, current: bool, desired: bool) -> Result<()> {
    if current == desired {
        return Ok(());
    }
    info!(project, enabled = desired, "Toggling monitoring");
    platform
        .client()
        .post_unit("/Projects/monitoring", &ProjectIdBody { project_id: project })
        .await?;
    wait_flag(platform, project, "monitoring", |r| r.is_monitoring_enabled, desired).await?;
    wait_ready(platform, project, platform.policy().toggle).await
}

/// `current` is the credential of an enabled backup, `None` when it is off.
pub(super) async fn reconcile_backup(
    platform: &Platform,
    project: i32,
    current: Option<i32>,
    desired: Option<i32>,
) -> Result<()> {
    if current == desired {
        return Ok(());
    }
    if let Some(old) = current {
        info!(project, credential = old, "Disabling backup");
        let body = BackupBody {
            project_id: project,
            backup_credential_id: old,
        };
        platform.client().post_unit("/Backup/disablebackup", &body).await?;
        wait_flag(platform, project, "backup", |r| r.is_backup_enabled, false).await?;
        wait_ready(platform, project, platform.policy().toggle).await?;
    }
    if let Some(new) = desired {
        info!(project, credential = new, "Enabling backup");
        let body = BackupBody {
            project_id: project,
            backup_credential_id: new,
        };
        platform.client().post_unit("/Backup/enablebackup", &body).await?;
        wait_ready(platform, project, platform.policy().toggle).await?;
    }
    Ok(())
}

pub(super) async fn reconcile_policy(
    platform: &Platform,
    project: i32,
    current: Option<i32>,
    desired: Option<i32>,
) -> Result<()> {
    if current == desired {
        return Ok(());
    }
    if let Some(old) = current {
        info!(project, profile = old, "Disabling gatekeeper");
        let body = GatekeeperBody {
            project_id: project,
            opa_profile_id: None,
        };
        platform.client().post_unit("/OpaProfiles/disablegatekeeper", &body).await?;
        wait_flag(platform, project, "gatekeeper", |r| r.is_opa_enabled, false).await?;
        wait_ready(platform, project, platform.policy().toggle).await?;
    }
    if let Some(new) = desired {
        info!(project, profile = new, "Enabling gatekeeper");
        let body = GatekeeperBody {
            project_id: project,
            opa_profile_id: Some(new),
        };
        platform.client().post_unit("/OpaProfiles/enablegatekeeper", &body).await?;
        wait_ready(platform, project, platform.policy().toggle).await?;
    }
    Ok(())
}

pub(super) async fn reconcile_alerting(
    platform: &Platform,
    project: i32,
    current: Option<i32>,
    desired: Option<i32>,
) -> Result<()> {
    if current == desired {
        return Ok(());
    }
    if current.is_some() {
        info!(project, "Detaching alerting profile");
        let body = AlertingBody {
            project_id: project,
            alerting_profile_id: None,
        };
        platform.client().post_unit("/AlertingProfiles/detach", &body).await?;
    }
    if let Some(profile) = desired {
        info!(project, profile, "Attaching alerting profile");
        let body = AlertingBody {
            project_id: project,
            alerting_profile_id: Some(profile),
        };
        platform.client().post_unit("/AlertingProfiles/attach", &body).await?;
    }
    Ok(())
}
