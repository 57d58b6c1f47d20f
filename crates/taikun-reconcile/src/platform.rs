//! Session handle threaded through every reconciler.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taikun_client::{ApiClient, LockRequest};
use taikun_core::config::Config;
use taikun_core::{Error, Result};

use crate::wait::{self, Operation, StatusSpec, WaitPolicy};

/// The API client (with its auth manager and cancellation token) plus the
/// wait policy. Cheap to clone; every clone shares one token pair.
#[derive(Debug, Clone)]
pub struct Platform {
    client: ApiClient,
    policy: WaitPolicy,
}

impl Platform {
    pub const fn new(client: ApiClient, policy: WaitPolicy) -> Self {
        Self { client, policy }
    }

    /// Build a session from resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = config.auth.credentials()?;
        let client = ApiClient::new(&config.api, credentials)?;
        Ok(Self::new(client, WaitPolicy::from(&config.timeouts)))
    }

    /// Tie every call and wait to `cancel`.
    #[must_use]
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            client: self.client.with_cancellation(cancel),
            policy: self.policy,
        }
    }

    pub const fn client(&self) -> &ApiClient {
        &self.client
    }

    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    pub const fn cancel(&self) -> &CancellationToken {
        self.client.cancellation()
    }

    /// Every row of a list endpoint.
    pub async fn list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        self.client.list_all(path, query).await
    }

    /// Rows of a list endpoint filtered by `Id`.
    pub async fn list_by_id<T: DeserializeOwned>(&self, path: &str, id: impl ToString) -> Result<Vec<T>> {
        self.client.list_all(path, &[("Id", id.to_string())]).await
    }

    /// `POST /{resource}/lockmanager {id, mode}`.
    pub async fn set_lock(&self, resource: &str, id: i32, locked: bool) -> Result<()> {
        info!(resource, id, locked, "Setting lock");
        self.client
            .post_unit(&format!("/{resource}/lockmanager"), &LockRequest::new(id, locked))
            .await
    }

    /// Delete by id, treating an already missing entity as deleted.
    pub async fn delete_ignoring_missing(&self, path: &str) -> Result<()> {
        match self.client.delete(path).await {
            Err(e) if e.is_not_found() => {
                info!(path, "Entity already gone");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn read_after<T, F, Fut>(&self, op: Operation, read: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        wait::read_after_op(&self.policy, op, self.cancel(), read).await
    }

    pub async fn wait_for<F, Fut>(&self, spec: &StatusSpec<'_>, poll: F) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        wait::wait_for_status(&self.policy, spec, self.cancel(), poll).await
    }

    pub async fn wait_gone<F, Fut>(
        &self,
        what: String,
        transitional: &[&str],
        deadline: Duration,
        poll: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        wait::wait_until_gone(&self.policy, what, transitional, deadline, self.cancel(), poll).await
    }
}

/// Exactly one row of `rows` must satisfy `matches`.
///
/// No match is [`Error::NotFound`], or [`Error::NotFoundAfterOp`] when
/// `after_op`; more than one is [`Error::Inconsistent`].
pub fn expect_one<T>(
    rows: Vec<T>,
    kind: &str,
    id: &str,
    after_op: bool,
    matches: impl Fn(&T) -> bool,
) -> Result<T> {
    let mut found = rows.into_iter().filter(|r| matches(r));
    match (found.next(), found.next()) {
        (Some(row), None) => Ok(row),
        (None, _) if after_op => Err(Error::not_found_after_op(kind, id)),
        (None, _) => Err(Error::not_found(kind, id)),
        (Some(_), Some(_)) => Err(Error::Inconsistent(format!(
            "more than one {kind} listed for id {id}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn expect_one_filters_by_predicate() {
        let row = expect_one(vec![1, 2, 3], "thing", "2", false, |r| *r == 2).unwrap();
        assert_eq!(row, 2);
    }

    #[test]
    fn expect_one_missing_depends_on_phase() {
        let plain = expect_one(Vec::<i32>::new(), "thing", "2", false, |_| true).unwrap_err();
        assert!(plain.is_not_found());
        let after = expect_one(Vec::<i32>::new(), "thing", "2", true, |_| true).unwrap_err();
        assert!(matches!(after, Error::NotFoundAfterOp { .. }));
    }

    #[test]
    fn expect_one_rejects_duplicates() {
        let err = expect_one(vec![2, 2], "thing", "2", false, |r| *r == 2).unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
    }
}
