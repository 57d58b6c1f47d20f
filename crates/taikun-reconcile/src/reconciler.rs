//! The CRUD contract every entity kind implements.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use taikun_core::{Error, Result, Validate};

/// Observed state of one entity: its id, the desired-state fields as the
/// platform reports them, and fields only the platform sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observed<S, C> {
    pub id: String,
    #[serde(flatten)]
    pub spec: S,
    #[serde(flatten)]
    pub computed: C,
}

impl<S, C> Observed<S, C> {
    pub fn new(id: impl ToString, spec: S, computed: C) -> Self {
        Self {
            id: id.to_string(),
            spec,
            computed,
        }
    }
}

/// Audit trail every platform row carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    #[serde(default, alias = "createdBy")]
    pub created_by: Option<String>,
    #[serde(default, alias = "lastModified")]
    pub last_modified: Option<String>,
    #[serde(default, alias = "lastModifiedBy")]
    pub last_modified_by: Option<String>,
}

/// Create, read, update and delete for one entity kind.
///
/// `create` and `update` finish with a read under the read-after-op kernel,
/// so the returned record reflects the platform after the mutation.
#[async_trait]
pub trait Reconciler: Send + Sync {
    type Spec: Validate + DeserializeOwned + Serialize + Send + Sync;
    type Computed: Serialize + Send;

    /// Kind name used in logs, errors and the CLI.
    const KIND: &'static str;

    async fn create(&self, desired: &Self::Spec) -> Result<Observed<Self::Spec, Self::Computed>>;

    async fn read(&self, id: &str) -> Result<Observed<Self::Spec, Self::Computed>>;

    async fn update(&self, id: &str, desired: &Self::Spec) -> Result<Observed<Self::Spec, Self::Computed>>;

    /// Remove the entity. An entity that is already gone is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Operation a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::validation("verb", format!("unknown operation `{other}`"))),
        }
    }
}

/// A caller-supplied operation plus the record it applies to.
#[derive(Debug, Clone)]
pub struct Intent {
    pub verb: Verb,
    pub id: Option<String>,
    /// Desired-state record, required for create and update.
    pub desired: Option<serde_json::Value>,
}

impl Intent {
    fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::validation("id", format!("`{}` requires an id", self.verb)))
    }

    fn desired<S: DeserializeOwned>(&self) -> Result<S> {
        let raw = self
            .desired
            .clone()
            .ok_or_else(|| Error::validation("desired", format!("`{}` requires a desired-state record", self.verb)))?;
        serde_json::from_value(raw).map_err(|e| Error::validation("desired", e.to_string()))
    }
}

/// Run `intent` against `reconciler` and render the outcome as JSON.
///
/// Delete yields `null`: the record no longer has an id.
pub async fn execute<R: Reconciler + ?Sized>(reconciler: &R, intent: &Intent) -> Result<serde_json::Value> {
    let observed = match intent.verb {
        Verb::Create => reconciler.create(&intent.desired()?).await?,
        Verb::Read => reconciler.read(intent.require_id()?).await?,
        Verb::Update => {
            let desired = intent.desired()?;
            reconciler.update(intent.require_id()?, &desired).await?
        }
        Verb::Delete => {
            reconciler.delete(intent.require_id()?).await?;
            return Ok(serde_json::Value::Null);
        }
    };
    Ok(serde_json::to_value(observed)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize)]
    struct Spec {
        name: String,
    }

    #[derive(Debug, Serialize)]
    struct Computed {
        #[serde(flatten)]
        audit: Audit,
    }

    #[test]
    fn observed_flattens_spec_and_computed() {
        let audit: Audit = serde_json::from_value(json!({
            "createdBy": "ops",
            "lastModified": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let rec = Observed::new(7, Spec { name: "p".into() }, Computed { audit });
        assert_eq!(
            serde_json::to_value(&rec).unwrap(),
            json!({
                "id": "7",
                "name": "p",
                "created_by": "ops",
                "last_modified": "2024-01-01T00:00:00Z",
                "last_modified_by": null
            })
        );
    }

    #[test]
    fn verbs_parse() {
        assert_eq!("update".parse::<Verb>().unwrap(), Verb::Update);
        assert!("upsert".parse::<Verb>().is_err());
    }

    #[test]
    fn intent_without_id_is_validation_error() {
        let intent = Intent {
            verb: Verb::Read,
            id: None,
            desired: None,
        };
        let err = intent.require_id().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn intent_with_bad_record_is_validation_error() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            name: String,
        }
        let intent = Intent {
            verb: Verb::Create,
            id: None,
            desired: Some(json!({"name": 3})),
        };
        let err = intent.desired::<Strict>().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
