//! Bounded retry and state polling.
//!
//! The platform is eventually consistent: a fresh entity may be missing from
//! its list endpoint for a while, and long operations (commit, service
//! toggles, deletion) report progress only through a status field. Both are
//! handled here with explicit deadlines and the session's cancellation token.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use taikun_core::config::TimeoutConfig;
use taikun_core::{Error, Result};

/// Deadlines and intervals for every wait the engine performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub read_after_create: Duration,
    pub read_after_update: Duration,
    /// Service toggles (monitoring, backup, policy) and sub-flag waits.
    pub toggle: Duration,
    /// Commit and full provisioning, and waits for deletion.
    pub provisioning: Duration,
    pub poll_interval: Duration,
    pub first_poll_delay: Duration,
    /// Pause between read-after-op attempts.
    pub retry_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for WaitPolicy {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            read_after_create: Duration::from_secs(t.read_after_create_secs),
            read_after_update: Duration::from_secs(t.read_after_update_secs),
            toggle: Duration::from_secs(t.toggle_secs),
            provisioning: Duration::from_secs(t.provisioning_secs),
            poll_interval: Duration::from_secs(t.poll_interval_secs),
            first_poll_delay: Duration::from_secs(t.first_poll_delay_secs),
            retry_interval: Duration::from_millis(t.retry_interval_ms),
        }
    }
}

impl WaitPolicy {
    /// Deadline for the read that follows `op`.
    pub const fn read_deadline(&self, op: Operation) -> Duration {
        match op {
            Operation::Create => self.read_after_create,
            Operation::Update => self.read_after_update,
        }
    }
}

/// Mutation a read-after-op follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
        })
    }
}

/// Sleep for `d` unless `cancel` fires first.
pub async fn pause(cancel: &CancellationToken, d: Duration) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        () = tokio::time::sleep(d) => Ok(()),
    }
}

/// Retry `read` while it reports the entity as not yet visible.
///
/// Only [`Error::NotFoundAfterOp`] is retried; every other error returns
/// at once. When the deadline for `op` elapses the result is
/// [`Error::Timeout`].
pub async fn read_after_op<T, F, Fut>(
    policy: &WaitPolicy,
    op: Operation,
    cancel: &CancellationToken,
    mut read: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = policy.read_deadline(op);
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;
        match read().await {
            Err(Error::NotFoundAfterOp { kind, id }) => {
                if start.elapsed() >= deadline {
                    return Err(Error::Timeout {
                        what: format!("{kind} {id} to become visible after {op}"),
                        after: deadline,
                    });
                }
                debug!(%kind, %id, attempt, %op, "Entity not yet visible, retrying");
                pause(cancel, policy.retry_interval).await?;
            }
            other => return other,
        }
    }
}

/// What a status wait is looking for.
#[derive(Debug, Clone)]
pub struct StatusSpec<'a> {
    /// Human-readable subject, e.g. `project 7 backup flag`.
    pub what: String,
    pub target: &'a [&'a str],
    pub transitional: &'a [&'a str],
    pub deadline: Duration,
}

impl StatusSpec<'_> {
    fn expected(&self) -> Vec<String> {
        self.target
            .iter()
            .chain(self.transitional)
            .map(|s| (*s).to_string())
            .collect()
    }
}

fn contains(set: &[&str], state: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(state))
}

/// Poll until the observed state is one of `spec.target`.
///
/// The first poll runs after `first_poll_delay`, later ones every
/// `poll_interval`. A state in neither `target` nor `transitional` is
/// [`Error::UnexpectedState`]. Returns the matched state.
pub async fn wait_for_status<F, Fut>(
    policy: &WaitPolicy,
    spec: &StatusSpec<'_>,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let start = Instant::now();
    pause(cancel, policy.first_poll_delay).await?;
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        let state = poll().await?;
        debug!(what = %spec.what, %state, polls, "Polled state");
        if contains(spec.target, &state) {
            return Ok(state);
        }
        if !contains(spec.transitional, &state) {
            return Err(Error::UnexpectedState {
                what: spec.what.clone(),
                state,
                expected: spec.expected(),
            });
        }
        if start.elapsed() >= spec.deadline {
            return Err(Error::Timeout {
                what: spec.what.clone(),
                after: spec.deadline,
            });
        }
        pause(cancel, policy.poll_interval).await?;
    }
}

/// Marker state reported by [`wait_until_gone`] when the entity vanished.
pub const GONE: &str = "<gone>";

/// Poll until `poll` reports the entity as absent (`None`).
///
/// While present, its state must stay within `transitional`.
pub async fn wait_until_gone<F, Fut>(
    policy: &WaitPolicy,
    what: String,
    transitional: &[&str],
    deadline: Duration,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>>>,
{
    let spec = StatusSpec {
        what,
        target: &[GONE],
        transitional,
        deadline,
    };
    wait_for_status(policy, &spec, cancel, || {
        let fut = poll();
        async move { Ok(fut.await?.unwrap_or_else(|| GONE.to_string())) }
    })
    .await
    .map(drop)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> WaitPolicy {
        WaitPolicy {
            read_after_create: Duration::from_millis(200),
            read_after_update: Duration::from_millis(100),
            toggle: Duration::from_millis(200),
            provisioning: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            first_poll_delay: Duration::from_millis(1),
            retry_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn policy_from_default_timeouts() {
        let p = WaitPolicy::default();
        assert_eq!(p.read_deadline(Operation::Create), Duration::from_secs(120));
        assert_eq!(p.read_deadline(Operation::Update), Duration::from_secs(60));
        assert_eq!(p.toggle, Duration::from_secs(300));
        assert_eq!(p.poll_interval, Duration::from_secs(5));
        assert_eq!(p.first_poll_delay, Duration::from_secs(2));
    }

    // =========================================================================
    // read_after_op
    // =========================================================================

    #[tokio::test]
    async fn read_after_op_retries_until_visible() {
        let calls = AtomicU32::new(0);
        let out = read_after_op(&fast(), Operation::Create, &CancellationToken::new(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::not_found_after_op("access profile", "42"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn read_after_op_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let err = read_after_op(&fast(), Operation::Update, &CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::not_found("access profile", "42"))
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_after_op_times_out() {
        let err = read_after_op(&fast(), Operation::Update, &CancellationToken::new(), || async {
            Err::<(), _>(Error::not_found_after_op("user", "u1"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err}");
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn read_after_op_observes_cancellation() {
        let cancel = CancellationToken::new();
        let err = read_after_op(&fast(), Operation::Create, &cancel, || {
            cancel.cancel();
            async { Err::<(), _>(Error::not_found_after_op("user", "u1")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    // =========================================================================
    // wait_for_status
    // =========================================================================

    fn scripted(states: &[&str]) -> Mutex<Vec<String>> {
        Mutex::new(states.iter().rev().map(|s| (*s).to_string()).collect())
    }

    #[tokio::test]
    async fn wait_for_status_reaches_target() {
        let states = scripted(&["Pending", "Updating", "Ready"]);
        let spec = StatusSpec {
            what: "project 7".into(),
            target: &["Ready"],
            transitional: &["Pending", "Updating"],
            deadline: Duration::from_secs(1),
        };
        let out = wait_for_status(&fast(), &spec, &CancellationToken::new(), || async {
            Ok(states.lock().unwrap().pop().unwrap())
        })
        .await
        .unwrap();
        assert_eq!(out, "Ready");
        assert!(states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_for_status_is_case_insensitive() {
        let spec = StatusSpec {
            what: "flag".into(),
            target: &["false"],
            transitional: &["true"],
            deadline: Duration::from_secs(1),
        };
        let out = wait_for_status(&fast(), &spec, &CancellationToken::new(), || async {
            Ok("False".to_string())
        })
        .await
        .unwrap();
        assert_eq!(out, "False");
    }

    #[tokio::test]
    async fn wait_for_status_rejects_unexpected_state() {
        let spec = StatusSpec {
            what: "project 7".into(),
            target: &["Ready"],
            transitional: &["Pending"],
            deadline: Duration::from_secs(1),
        };
        let err = wait_for_status(&fast(), &spec, &CancellationToken::new(), || async {
            Ok("Failure".to_string())
        })
        .await
        .unwrap_err();
        match err {
            Error::UnexpectedState { state, expected, .. } => {
                assert_eq!(state, "Failure");
                assert_eq!(expected, vec!["Ready", "Pending"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn wait_for_status_times_out_in_transitional_state() {
        let spec = StatusSpec {
            what: "project 7".into(),
            target: &["Ready"],
            transitional: &["Updating"],
            deadline: Duration::from_millis(30),
        };
        let err = wait_for_status(&fast(), &spec, &CancellationToken::new(), || async {
            Ok("Updating".to_string())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_for_status_cancelled_during_first_delay() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let spec = StatusSpec {
            what: "project 7".into(),
            target: &["Ready"],
            transitional: &[],
            deadline: Duration::from_secs(1),
        };
        let polled = AtomicU32::new(0);
        let err = wait_for_status(&fast(), &spec, &cancel, || async {
            polled.fetch_add(1, Ordering::SeqCst);
            Ok("Ready".to_string())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_until_gone_finishes_when_absent() {
        let polls = AtomicU32::new(0);
        wait_until_gone(
            &fast(),
            "project 7".into(),
            &["Deleting"],
            Duration::from_secs(1),
            &CancellationToken::new(),
            || async {
                if polls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Some("Deleting".to_string()))
                } else {
                    Ok(None)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
