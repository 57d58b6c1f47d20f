//! Static validation of desired-state records.
//!
//! Reconcilers call [`Validate::validate`] before issuing any platform call so
//! that schema, grammar and enum violations surface as `ValidationError`
//! carrying the path of the offending attribute.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// A desired-state record that can check its own static invariants.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

static DOCKER_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)(?:\.(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?))*(?::[0-9]+)?/)?[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$",
    )
    .expect("static regex is valid")
});

static DOCKER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127}$").expect("static regex is valid"));

static RETENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<h>\d+)h)?(?:(?P<m>\d+)m)?(?:(?P<s>\d+)s)?$").expect("static regex is valid")
});

static POSIX_LOGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,30}\$?$").expect("static regex is valid"));

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("static regex is valid"));

static K8S_LABEL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9.-]*[a-z0-9])?/)?[a-zA-Z0-9](?:[a-zA-Z0-9_.-]{0,61}[a-zA-Z0-9])?$")
        .expect("static regex is valid")
});

/// Login names the platform reserves for its own images.
const RESERVED_LOGINS: &[&str] = &["ubuntu"];

pub fn require_non_empty(path: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(path, "must not be empty"));
    }
    Ok(())
}

/// Entity names: alphanumeric start, then `[a-zA-Z0-9_.-]`, length within bounds.
pub fn validate_name(path: &str, name: &str, min: usize, max: usize) -> Result<()> {
    let len = name.chars().count();
    if len < min || len > max {
        return Err(Error::validation(
            path,
            format!("length must be between {min} and {max} characters, got {len}"),
        ));
    }
    if !NAME_RE.is_match(name) {
        return Err(Error::validation(
            path,
            format!("`{name}` may only contain alphanumerics, `-`, `_` and `.`"),
        ));
    }
    Ok(())
}

pub fn validate_docker_repo(path: &str, repo: &str) -> Result<()> {
    if DOCKER_REPO_RE.is_match(repo) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{repo}` is not a valid Docker repository")))
    }
}

pub fn validate_docker_tag(path: &str, tag: &str) -> Result<()> {
    if DOCKER_TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{tag}` is not a valid Docker tag")))
    }
}

/// `(<d>h)?(<d>m)?(<d>s)?` with at least one non-zero component.
pub fn validate_retention_period(path: &str, period: &str) -> Result<()> {
    let caps = RETENTION_RE.captures(period).ok_or_else(|| {
        Error::validation(path, format!("`{period}` does not match `<h>h<m>m<s>s`"))
    })?;
    let any_nonzero = ["h", "m", "s"].iter().any(|name| {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .is_some_and(|v| v > 0)
    });
    if any_nonzero {
        Ok(())
    } else {
        Err(Error::validation(
            path,
            format!("`{period}` must have at least one non-zero component"),
        ))
    }
}

/// POSIX login name, excluding names the platform reserves.
pub fn validate_posix_login(path: &str, login: &str) -> Result<()> {
    if RESERVED_LOGINS.contains(&login) {
        return Err(Error::validation(path, format!("`{login}` is a reserved login name")));
    }
    if POSIX_LOGIN_RE.is_match(login) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{login}` is not a POSIX login name")))
    }
}

pub fn validate_ip(path: &str, address: &str) -> Result<()> {
    address
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| Error::validation(path, format!("`{address}` is not an IP address")))
}

pub fn validate_mask_bits(path: &str, bits: u8) -> Result<()> {
    if bits > 32 {
        return Err(Error::validation(path, format!("mask bits must be 0..=32, got {bits}")));
    }
    Ok(())
}

pub fn validate_url(path: &str, url: &str) -> Result<()> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{url}` is not an http(s) URL")))
    }
}

pub fn validate_email(path: &str, email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Error::validation(path, format!("`{email}` is not an email address"))),
    }
}

pub fn validate_port(path: &str, port: i32) -> Result<()> {
    if (0..=65_535).contains(&port) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("port {port} is out of range")))
    }
}

/// Kubernetes node-label key (optional DNS prefix, then a 63-char name).
pub fn validate_label_key(path: &str, key: &str) -> Result<()> {
    if K8S_LABEL_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{key}` is not a valid label key")))
    }
}

/// Five-field cron expression; each field is `*`, numbers, ranges, lists or steps.
pub fn validate_cron(path: &str, expr: &str) -> Result<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::validation(
            path,
            format!("cron expression must have 5 fields, got {}", fields.len()),
        ));
    }
    let ok = fields.iter().all(|f| {
        f.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | ',' | '-' | '/'))
    });
    if ok {
        Ok(())
    } else {
        Err(Error::validation(path, format!("`{expr}` is not a cron expression")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_repos() {
        for ok in [
            "nginx",
            "library/nginx",
            "docker.io/library/nginx",
            "registry.example.com:5000/team/app",
            "my-org/my_app",
        ] {
            assert!(validate_docker_repo("allowed_repos", ok).is_ok(), "{ok}");
        }
        for bad in ["", "Nginx", "nginx/", "/nginx", "nginx:latest"] {
            assert!(validate_docker_repo("allowed_repos", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn docker_tags() {
        assert!(validate_docker_tag("forbidden_tags", "latest").is_ok());
        assert!(validate_docker_tag("forbidden_tags", "v1.2.3-rc_1").is_ok());
        assert!(validate_docker_tag("forbidden_tags", ".hidden").is_err());
        assert!(validate_docker_tag("forbidden_tags", &"a".repeat(129)).is_err());
    }

    #[test]
    fn retention_periods() {
        for ok in ["24h", "1h30m", "90s", "0h5m", "1h0m0s"] {
            assert!(validate_retention_period("retention_period", ok).is_ok(), "{ok}");
        }
        for bad in ["", "0h", "0h0m0s", "1d", "30m1h", "h"] {
            assert!(validate_retention_period("retention_period", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn posix_logins() {
        assert!(validate_posix_login("ssh_user.name", "deploy").is_ok());
        assert!(validate_posix_login("ssh_user.name", "_svc-01").is_ok());
        assert!(validate_posix_login("ssh_user.name", "ubuntu").is_err());
        assert!(validate_posix_login("ssh_user.name", "Root").is_err());
        assert!(validate_posix_login("ssh_user.name", "1abc").is_err());
    }

    #[test]
    fn names() {
        assert!(validate_name("name", "prod-cluster_1", 3, 30).is_ok());
        assert!(validate_name("name", "ab", 3, 30).is_err());
        assert!(validate_name("name", "has space", 3, 30).is_err());
    }

    #[test]
    fn misc_grammars() {
        assert!(validate_ip("dns_server", "10.0.0.1").is_ok());
        assert!(validate_ip("dns_server", "::1").is_ok());
        assert!(validate_ip("dns_server", "dns.local").is_err());
        assert!(validate_mask_bits("mask_bits", 33).is_err());
        assert!(validate_email("email", "ops@example.com").is_ok());
        assert!(validate_email("email", "ops@localhost").is_err());
        assert!(validate_cron("cron_period", "0 3 * * *").is_ok());
        assert!(validate_cron("cron_period", "0 3 * *").is_err());
        assert!(validate_label_key("labels.key", "node-role.kubernetes.io/worker").is_ok());
        assert!(validate_label_key("labels.key", "-bad").is_err());
    }
}
