//! Configuration resolution for taikun-reconcile.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/taikun/config.json) or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (applied by the caller, highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default platform API host.
pub const DEFAULT_BASE_URL: &str = "https://api.taikun.cloud";

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Platform endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_version: u32,
    /// Per-request transport timeout (seconds).
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: 1,
            request_timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Which login endpoint the session authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthBackend {
    #[default]
    Default,
    Federated,
}

impl std::str::FromStr for AuthBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "" => Ok(Self::Default),
            "federated" | "keycloak" => Ok(Self::Federated),
            other => Err(Error::Config(format!(
                "unknown auth backend `{other}` (expected `default` or `federated`)"
            ))),
        }
    }
}

/// Session credentials.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthSettings {
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub backend: AuthBackend,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("backend", &self.backend)
            .finish()
    }
}

/// Credentials resolved from [`AuthSettings`], both halves present.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub backend: AuthBackend,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl AuthSettings {
    /// Both email and password are required to establish a session.
    pub fn credentials(&self) -> Result<Credentials> {
        let email = self
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::Config("email is not set (TAIKUN_EMAIL or EMAIL)".into()))?;
        let password = self
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::Config("password is not set (TAIKUN_PASSWORD or PASSWORD)".into())
            })?;
        Ok(Credentials {
            email,
            password,
            backend: self.backend,
        })
    }
}

/// Retry and wait budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub read_after_create_secs: u64,
    pub read_after_update_secs: u64,
    /// Service toggles (monitoring, backup, policy) and lock transitions.
    pub toggle_secs: u64,
    /// Full project provisioning and deletion.
    pub provisioning_secs: u64,
    pub poll_interval_secs: u64,
    pub first_poll_delay_secs: u64,
    pub retry_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_after_create_secs: 2 * 60,
            read_after_update_secs: 60,
            toggle_secs: 5 * 60,
            provisioning_secs: 60 * 60,
            poll_interval_secs: 5,
            first_poll_delay_secs: 2,
            retry_interval_ms: 1000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "taikun=info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` replaces the global config file when given; a missing explicit
/// file is an error, a missing global file is not.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("taikun").join("config.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// First set, non-empty variable among `names`.
fn first_var(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| lookup(n).filter(|v| !v.is_empty()))
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(val) = first_var(&lookup, &["TAIKUN_API_HOST"]) {
        config.api.base_url = if val.starts_with("http://") || val.starts_with("https://") {
            val
        } else {
            format!("https://{val}")
        };
    }
    if let Some(val) = first_var(&lookup, &["TAIKUN_EMAIL", "EMAIL"]) {
        config.auth.email = Some(val);
    }
    if let Some(val) = first_var(&lookup, &["TAIKUN_PASSWORD", "PASSWORD"]) {
        config.auth.password = Some(val);
    }
    if let Some(val) = first_var(&lookup, &["TAIKUN_AUTH_MODE"]) {
        config.auth.backend = val.parse()?;
    }
    if let Some(val) = first_var(&lookup, &["TAIKUN_LOG_LEVEL"]) {
        config.logging.level = val;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_timeouts_match_platform_budgets() {
        let t = TimeoutConfig::default();
        assert_eq!(t.read_after_create_secs, 120);
        assert_eq!(t.read_after_update_secs, 60);
        assert_eq!(t.toggle_secs, 300);
        assert_eq!(t.poll_interval_secs, 5);
        assert_eq!(t.first_poll_delay_secs, 2);
    }

    #[test]
    fn prefixed_env_wins_over_bare() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("EMAIL", "bare@example.com"),
                ("TAIKUN_EMAIL", "prefixed@example.com"),
                ("PASSWORD", "secret"),
            ]),
        )
        .unwrap();
        let creds = config.auth.credentials().unwrap();
        assert_eq!(creds.email, "prefixed@example.com");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn api_host_gets_scheme() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("TAIKUN_API_HOST", "api.example.test")])).unwrap();
        assert_eq!(config.api.base_url, "https://api.example.test");
    }

    #[test]
    fn federated_backend_from_env() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("TAIKUN_AUTH_MODE", "keycloak")])).unwrap();
        assert_eq!(config.auth.backend, AuthBackend::Federated);
        assert!(apply_env_overrides(&mut config, env(&[("TAIKUN_AUTH_MODE", "saml")])).is_err());
    }

    #[test]
    fn missing_credentials_is_config_error() {
        let err = AuthSettings::default().credentials().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn file_layer_merges_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api": {"base_url": "https://staging.example"}, "timeouts": {"toggle_secs": 10}}"#,
        )
        .unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.api.base_url, "https://staging.example");
        assert_eq!(config.api.api_version, 1);
        assert_eq!(config.timeouts.toggle_secs, 10);
        assert_eq!(config.timeouts.read_after_create_secs, 120);
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let settings = AuthSettings {
            email: Some("a@b.c".into()),
            password: Some("hunter2".into()),
            backend: AuthBackend::Default,
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
