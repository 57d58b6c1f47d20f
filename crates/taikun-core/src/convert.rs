//! Value translations between desired-state form and platform form.
//!
//! Sizes are carried in gibibytes on the desired side; the platform speaks
//! mebibytes for AWS/OpenStack-style flavors and bytes for GCP flavors and
//! server disks. Dates are `dd/mm/yyyy` on the desired side and midnight UTC
//! RFC 3339 timestamps on the platform side.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MEBI_PER_GIBI: i64 = 1024;
const BYTES_PER_GIBI: i64 = 1_073_741_824;

const DATE_FORMAT: &str = "%d/%m/%Y";
const PLATFORM_DATE_FORMAT: &str = "%Y-%m-%dT00:00:00Z";

/// chrono's `%d`/`%m` also take one digit; dates must be zero-padded.
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("static regex is valid"));

pub const fn gibi_to_mebi(gibi: i64) -> i64 {
    gibi.saturating_mul(MEBI_PER_GIBI)
}

pub const fn mebi_to_gibi(mebi: i64) -> i64 {
    mebi / MEBI_PER_GIBI
}

pub const fn gibi_to_bytes(gibi: i64) -> i64 {
    gibi.saturating_mul(BYTES_PER_GIBI)
}

pub const fn bytes_to_gibi(bytes: i64) -> i64 {
    bytes / BYTES_PER_GIBI
}

/// `dd/mm/yyyy` → `yyyy-mm-ddT00:00:00Z`.
pub fn date_to_rfc3339(date: &str) -> Result<String> {
    if !DATE_RE.is_match(date) {
        return Err(Error::validation(
            "expiration_date",
            format!("`{date}` is not dd/mm/yyyy"),
        ));
    }
    let parsed = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|e| {
        Error::validation("expiration_date", format!("`{date}` is not dd/mm/yyyy: {e}"))
    })?;
    Ok(parsed.format(PLATFORM_DATE_FORMAT).to_string())
}

/// Platform timestamp → `dd/mm/yyyy`.
///
/// Accepts full RFC 3339 as well as the offset-less `yyyy-mm-ddThh:mm:ss`
/// form some endpoints return.
pub fn rfc3339_to_date(timestamp: &str) -> Result<String> {
    let date = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .map_err(|e| {
            Error::Inconsistent(format!("platform returned unparseable date `{timestamp}`: {e}"))
        })?;
    Ok(date.format(DATE_FORMAT).to_string())
}

/// Platform form of the lock flag.
pub const fn lock_mode(locked: bool) -> &'static str {
    if locked { "lock" } else { "unlock" }
}

/// Aggregation applied to a Prometheus metric by billing and showback rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrometheusType {
    #[default]
    Count,
    Sum,
}

impl PrometheusType {
    pub const fn as_platform(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
        }
    }

    pub fn from_platform(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "COUNT" => Ok(Self::Count),
            "SUM" => Ok(Self::Sum),
            other => Err(Error::Inconsistent(format!("unknown prometheus type `{other}`"))),
        }
    }
}

/// Showback rule kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShowbackKind {
    #[default]
    General,
    External,
}

impl ShowbackKind {
    pub const fn as_platform(self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::External => "EXTERNAL",
        }
    }

    pub fn from_platform(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GENERAL" => Ok(Self::General),
            "EXTERNAL" => Ok(Self::External),
            other => Err(Error::Inconsistent(format!("unknown showback kind `{other}`"))),
        }
    }
}

/// Kubernetes load-balancing solution, projected onto the platform's two
/// booleans `(octaviaEnabled, taikunLBEnabled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadBalancingSolution {
    Octavia,
    Taikun,
    #[default]
    None,
}

impl LoadBalancingSolution {
    pub const fn to_flags(self) -> (bool, bool) {
        match self {
            Self::Octavia => (true, false),
            Self::Taikun => (false, true),
            Self::None => (false, false),
        }
    }

    /// Octavia wins if the platform ever reports both flags.
    pub const fn from_flags(octavia_enabled: bool, taikun_lb_enabled: bool) -> Self {
        match (octavia_enabled, taikun_lb_enabled) {
            (true, _) => Self::Octavia,
            (false, true) => Self::Taikun,
            (false, false) => Self::None,
        }
    }
}

/// Security-group rule protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum SecurityGroupProtocol {
    Tcp,
    #[default]
    Udp,
    Icmp,
}

impl SecurityGroupProtocol {
    pub const fn as_platform(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
        }
    }

    /// Case-insensitive parse; anything unrecognised falls back to UDP.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for SecurityGroupProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            "ICMP" => Ok(Self::Icmp),
            other => Err(Error::validation(
                "protocol",
                format!("`{other}` is not one of TCP, UDP, ICMP"),
            )),
        }
    }
}

impl From<String> for SecurityGroupProtocol {
    fn from(raw: String) -> Self {
        Self::parse_lenient(&raw)
    }
}

impl fmt::Display for SecurityGroupProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_platform())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn gibi_mebi_roundtrip_is_identity() {
        for gibi in [0, 1, 2, 7, 64, 1024, 65_536] {
            assert_eq!(mebi_to_gibi(gibi_to_mebi(gibi)), gibi);
        }
        assert_eq!(gibi_to_mebi(4), 4096);
    }

    #[test]
    fn gibi_bytes_roundtrip_is_identity() {
        for gibi in [0, 1, 30, 100, 2048] {
            assert_eq!(bytes_to_gibi(gibi_to_bytes(gibi)), gibi);
        }
        assert_eq!(gibi_to_bytes(1), 1_073_741_824);
    }

    #[test]
    fn date_translation_roundtrip() {
        for date in ["01/01/2030", "29/02/2028", "31/12/1999", "15/07/2026"] {
            let platform = date_to_rfc3339(date).unwrap();
            assert_eq!(rfc3339_to_date(&platform).unwrap(), date);
        }
    }

    #[test]
    fn date_to_platform_form() {
        assert_eq!(date_to_rfc3339("05/03/2027").unwrap(), "2027-03-05T00:00:00Z");
    }

    #[test]
    fn date_rejects_invalid_calendar_days() {
        assert!(date_to_rfc3339("31/02/2027").is_err());
        assert!(date_to_rfc3339("2027-03-05").is_err());
    }

    #[test]
    fn date_must_be_zero_padded() {
        for date in ["1/2/2027", "01/2/2027", "1/02/2027", "01/02/27", " 01/02/2027"] {
            let err = date_to_rfc3339(date).unwrap_err();
            assert_eq!(err.exit_code(), 1, "{date}");
        }
        let padded = date_to_rfc3339("01/02/2027").unwrap();
        assert_eq!(rfc3339_to_date(&padded).unwrap(), "01/02/2027");
    }

    #[test]
    fn platform_date_without_offset_is_accepted() {
        assert_eq!(rfc3339_to_date("2027-03-05T00:00:00").unwrap(), "05/03/2027");
    }

    #[test]
    fn load_balancer_flags() {
        assert_eq!(LoadBalancingSolution::Octavia.to_flags(), (true, false));
        assert_eq!(LoadBalancingSolution::Taikun.to_flags(), (false, true));
        assert_eq!(LoadBalancingSolution::None.to_flags(), (false, false));
        for lb in [
            LoadBalancingSolution::Octavia,
            LoadBalancingSolution::Taikun,
            LoadBalancingSolution::None,
        ] {
            let (o, t) = lb.to_flags();
            assert_eq!(LoadBalancingSolution::from_flags(o, t), lb);
        }
    }

    #[test]
    fn protocol_is_case_insensitive_with_udp_default() {
        assert_eq!(SecurityGroupProtocol::parse_lenient("tcp"), SecurityGroupProtocol::Tcp);
        assert_eq!(SecurityGroupProtocol::parse_lenient("Icmp"), SecurityGroupProtocol::Icmp);
        assert_eq!(SecurityGroupProtocol::parse_lenient("gre"), SecurityGroupProtocol::Udp);
    }

    #[test]
    fn enum_platform_forms() {
        assert_eq!(PrometheusType::Sum.as_platform(), "SUM");
        assert_eq!(PrometheusType::from_platform("count").unwrap(), PrometheusType::Count);
        assert_eq!(ShowbackKind::External.as_platform(), "EXTERNAL");
        assert_eq!(lock_mode(true), "lock");
        assert_eq!(lock_mode(false), "unlock");
    }
}
