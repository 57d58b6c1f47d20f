//! Wire envelopes shared by every endpoint.

use serde::{Deserialize, Serialize};

use taikun_core::convert::lock_mode;
use taikun_core::{Error, Result};

/// Response of a create call: the platform sends the new id either as a
/// number or as its decimal string.
#[derive(Debug, Clone, Deserialize)]
pub struct Created {
    pub id: serde_json::Value,
}

impl Created {
    pub fn id(&self) -> Result<i32> {
        match &self.id {
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| Error::Inconsistent(format!("created id {n} is not a 32-bit integer"))),
            serde_json::Value::String(s) => s
                .parse()
                .map_err(|_| Error::Inconsistent(format!("created id `{s}` is not an integer"))),
            other => Err(Error::Inconsistent(format!("created id has unexpected shape: {other}"))),
        }
    }

    /// The id as sent by the platform, for entities keyed by strings.
    pub fn raw_id(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Body of every `…/lockmanager` call.
#[derive(Debug, Clone, Serialize)]
pub struct LockRequest {
    pub id: i32,
    pub mode: &'static str,
}

impl LockRequest {
    pub const fn new(id: i32, locked: bool) -> Self {
        Self {
            id,
            mode: lock_mode(locked),
        }
    }
}

/// Platform error body `{message, statusCode}`; the status is taken from
/// the HTTP response instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn created_id_accepts_number_and_string() {
        let n: Created = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        let s: Created = serde_json::from_str(r#"{"id": "42"}"#).unwrap();
        assert_eq!(n.id().unwrap(), 42);
        assert_eq!(s.id().unwrap(), 42);
    }

    #[test]
    fn created_id_rejects_guid_as_integer() {
        let g: Created =
            serde_json::from_str(r#"{"id": "5b1f0e2c-7a1d-4b1e-9a0e-0c6f1b2d3e4f"}"#).unwrap();
        assert!(g.id().is_err());
        assert_eq!(g.raw_id(), "5b1f0e2c-7a1d-4b1e-9a0e-0c6f1b2d3e4f");
    }

    #[test]
    fn lock_request_uses_platform_mode() {
        let body = serde_json::to_value(LockRequest::new(3, true)).unwrap();
        assert_eq!(body, serde_json::json!({"id": 3, "mode": "lock"}));
    }
}
