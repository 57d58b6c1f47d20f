//! Run one parsed command against the platform.

use std::path::Path;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::info;

use taikun_core::{Error, Result};
use taikun_reconcile::resources::catalog;
use taikun_reconcile::{Intent, Kind, Platform, Verb, dispatch};

use crate::args::{Command, IntentArgs};

/// Outcome of `command` as the JSON printed on stdout.
pub async fn run(command: &Command, platform: Platform) -> Result<Value> {
    match command {
        Command::Create(args) => intent(Verb::Create, args, platform).await,
        Command::Read(args) => intent(Verb::Read, args, platform).await,
        Command::Update(args) => intent(Verb::Update, args, platform).await,
        Command::Delete(args) => intent(Verb::Delete, args, platform).await,
        Command::Flavors(args) => {
            let flavors = catalog::flavors(&platform, args.catalog.credential, &args.filter()).await?;
            Ok(serde_json::to_value(flavors)?)
        }
        Command::Images(args) => {
            let images = catalog::images(&platform, args.credential).await?;
            Ok(serde_json::to_value(images)?)
        }
    }
}

async fn intent(verb: Verb, args: &IntentArgs, platform: Platform) -> Result<Value> {
    let kind: Kind = args.kind.parse()?;
    let desired = match &args.file {
        Some(path) => Some(read_desired(path).await?),
        None => None,
    };
    let intent = Intent {
        verb,
        id: args.id.clone(),
        desired,
    };
    info!(%verb, %kind, id = ?intent.id, "Running intent");
    dispatch(kind, platform, &intent).await
}

/// Desired-state record from `path`, or stdin for `-`.
pub async fn read_desired(path: &Path) -> Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .map_err(|e| Error::validation("file", format!("cannot read stdin: {e}")))?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::validation("file", format!("cannot read {}: {e}", path.display())))?
    };
    serde_json::from_str(&raw).map_err(|e| Error::validation("file", format!("{} is not JSON: {e}", path.display())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn desired_record_is_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{"name": "strict", "lock": true}"#).unwrap();
        let desired = read_desired(&path).await.unwrap();
        assert_eq!(desired, json!({"name": "strict", "lock": true}));
    }

    #[tokio::test]
    async fn unreadable_or_invalid_file_is_a_caller_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_desired(&dir.path().join("absent.json")).await.unwrap_err();
        assert_eq!(missing.exit_code(), 1);

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{name:").unwrap();
        let broken = read_desired(&path).await.unwrap_err();
        assert_eq!(broken.exit_code(), 1);
    }
}
