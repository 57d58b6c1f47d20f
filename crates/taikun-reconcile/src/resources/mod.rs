//! One module per entity kind.

pub mod access_profile;
pub mod alerting_profile;
pub mod backup_credential;
pub mod backup_policy;
pub mod billing_credential;
pub mod billing_rule;
pub mod catalog;
pub mod cloud_credential;
pub mod kubeconfig;
pub mod kubernetes_profile;
mod members;
pub mod organization;
pub mod organization_billing_rule;
pub mod policy_profile;
pub mod project_user;
pub mod showback_credential;
pub mod showback_rule;
pub mod slack;
pub mod standalone_profile;
pub mod user;

pub use access_profile::AccessProfiles;
pub use alerting_profile::AlertingProfiles;
pub use backup_credential::BackupCredentials;
pub use backup_policy::BackupPolicies;
pub use billing_credential::BillingCredentials;
pub use billing_rule::BillingRules;
pub use cloud_credential::CloudCredentials;
pub use kubeconfig::Kubeconfigs;
pub use kubernetes_profile::KubernetesProfiles;
pub use organization::Organizations;
pub use organization_billing_rule::OrganizationBillingRules;
pub use policy_profile::PolicyProfiles;
pub use project_user::ProjectUsers;
pub use showback_credential::ShowbackCredentials;
pub use showback_rule::ShowbackRules;
pub use slack::SlackConfigurations;
pub use standalone_profile::StandaloneProfiles;
pub use user::Users;
