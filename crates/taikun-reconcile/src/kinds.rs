//! Entity kinds by name, and dispatch of an intent to the matching reconciler.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use taikun_core::{Error, Result};

use crate::platform::Platform;
use crate::project::Projects;
use crate::reconciler::{Intent, execute};
use crate::resources::{
    AccessProfiles, AlertingProfiles, BackupCredentials, BackupPolicies, BillingCredentials, BillingRules,
    CloudCredentials, Kubeconfigs, KubernetesProfiles, OrganizationBillingRules, Organizations, PolicyProfiles,
    ProjectUsers, ShowbackCredentials, ShowbackRules, SlackConfigurations, StandaloneProfiles, Users,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    AccessProfile,
    AlertingProfile,
    BackupCredential,
    BackupPolicy,
    BillingCredential,
    BillingRule,
    CloudCredential,
    Kubeconfig,
    KubernetesProfile,
    Organization,
    OrganizationBillingRule,
    PolicyProfile,
    Project,
    ProjectUser,
    ShowbackCredential,
    ShowbackRule,
    SlackConfiguration,
    StandaloneProfile,
    User,
}

impl Kind {
    pub const ALL: [Self; 19] = [
        Self::AccessProfile,
        Self::AlertingProfile,
        Self::BackupCredential,
        Self::BackupPolicy,
        Self::BillingCredential,
        Self::BillingRule,
        Self::CloudCredential,
        Self::Kubeconfig,
        Self::KubernetesProfile,
        Self::Organization,
        Self::OrganizationBillingRule,
        Self::PolicyProfile,
        Self::Project,
        Self::ProjectUser,
        Self::ShowbackCredential,
        Self::ShowbackRule,
        Self::SlackConfiguration,
        Self::StandaloneProfile,
        Self::User,
    ];

    /// Command-line name, e.g. `access-profile`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::AccessProfile => "access-profile",
            Self::AlertingProfile => "alerting-profile",
            Self::BackupCredential => "backup-credential",
            Self::BackupPolicy => "backup-policy",
            Self::BillingCredential => "billing-credential",
            Self::BillingRule => "billing-rule",
            Self::CloudCredential => "cloud-credential",
            Self::Kubeconfig => "kubeconfig",
            Self::KubernetesProfile => "kubernetes-profile",
            Self::Organization => "organization",
            Self::OrganizationBillingRule => "organization-billing-rule",
            Self::PolicyProfile => "policy-profile",
            Self::Project => "project",
            Self::ProjectUser => "project-user",
            Self::ShowbackCredential => "showback-credential",
            Self::ShowbackRule => "showback-rule",
            Self::SlackConfiguration => "slack-configuration",
            Self::StandaloneProfile => "standalone-profile",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|k| k.name() == wanted).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
            Error::validation("kind", format!("unknown kind `{s}` (expected one of {})", known.join(", ")))
        })
    }
}

/// Run `intent` against the reconciler for `kind`.
pub async fn dispatch(kind: Kind, platform: Platform, intent: &Intent) -> Result<Value> {
    match kind {
        Kind::AccessProfile => execute(&AccessProfiles::new(platform), intent).await,
        Kind::AlertingProfile => execute(&AlertingProfiles::new(platform), intent).await,
        Kind::BackupCredential => execute(&BackupCredentials::new(platform), intent).await,
        Kind::BackupPolicy => execute(&BackupPolicies::new(platform), intent).await,
        Kind::BillingCredential => execute(&BillingCredentials::new(platform), intent).await,
        Kind::BillingRule => execute(&BillingRules::new(platform), intent).await,
        Kind::CloudCredential => execute(&CloudCredentials::new(platform), intent).await,
        Kind::Kubeconfig => execute(&Kubeconfigs::new(platform), intent).await,
        Kind::KubernetesProfile => execute(&KubernetesProfiles::new(platform), intent).await,
        Kind::Organization => execute(&Organizations::new(platform), intent).await,
        Kind::OrganizationBillingRule => execute(&OrganizationBillingRules::new(platform), intent).await,
        Kind::PolicyProfile => execute(&PolicyProfiles::new(platform), intent).await,
        Kind::Project => execute(&Projects::new(platform), intent).await,
        Kind::ProjectUser => execute(&ProjectUsers::new(platform), intent).await,
        Kind::ShowbackCredential => execute(&ShowbackCredentials::new(platform), intent).await,
        Kind::ShowbackRule => execute(&ShowbackRules::new(platform), intent).await,
        Kind::SlackConfiguration => execute(&SlackConfigurations::new(platform), intent).await,
        Kind::StandaloneProfile => execute(&StandaloneProfiles::new(platform), intent).await,
        Kind::User => execute(&Users::new(platform), intent).await,
    }
}
