//! Unlock, mutate, relock.
//!
//! A locked entity rejects every mutation. The observed and desired lock bits
//! are independent: locked before and after with a field change in between
//! still needs unlock, mutate, lock.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info};

use taikun_core::{Error, Result};

use crate::platform::Platform;
use crate::wait::StatusSpec;

/// An entity kind whose instances carry a lock bit.
#[async_trait]
pub trait LockTarget: Send + Sync {
    /// Kind name used in logs and errors.
    fn lock_kind(&self) -> &'static str;

    /// Lock bit as the platform currently reports it.
    async fn observed_lock(&self, id: i32) -> Result<bool>;

    async fn set_lock(&self, id: i32, locked: bool) -> Result<()>;
}

/// Calls the mediator will make, decided from the two lock bits and whether
/// any other field changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPlan {
    pub unlock_first: bool,
    pub mutate: bool,
    pub relock: bool,
}

impl LockPlan {
    pub const fn new(observed_locked: bool, desired_locked: bool, has_changes: bool) -> Self {
        let unlock_first = observed_locked && (has_changes || !desired_locked);
        Self {
            unlock_first,
            mutate: has_changes,
            relock: desired_locked && (!observed_locked || unlock_first),
        }
    }

    pub const fn is_noop(&self) -> bool {
        !self.unlock_first && !self.mutate && !self.relock
    }
}

const LOCKED: &str = "locked";
const UNLOCKED: &str = "unlocked";

/// Clear the lock on `id`, then wait (up to the read-after-update deadline)
/// for the platform to report it clear. An unlock that never lands is
/// [`Error::Conflict`].
async fn unlock_and_wait<T: LockTarget + ?Sized>(target: &T, platform: &Platform, id: i32) -> Result<()> {
    let kind = target.lock_kind();
    target.set_lock(id, false).await?;
    let spec = StatusSpec {
        what: format!("{kind} {id} unlock"),
        target: &[UNLOCKED],
        transitional: &[LOCKED],
        deadline: platform.policy().read_after_update,
    };
    platform
        .wait_for(&spec, move || {
            let observed = target.observed_lock(id);
            async move { Ok(if observed.await? { LOCKED } else { UNLOCKED }.to_string()) }
        })
        .await
        .map(drop)
        .map_err(|e| match e {
            Error::Timeout { .. } => Error::Conflict(format!("{kind} {id} is still locked after unlock")),
            other => other,
        })
}

/// Run `mutation` on entity `id` under the lock discipline.
///
/// When an unlock is needed it must be observed before `mutation` runs;
/// if it never is the result is [`Error::Conflict`] and `mutation` is not run.
pub async fn mediate<T, F, Fut>(
    target: &T,
    platform: &Platform,
    id: i32,
    desired_locked: bool,
    has_changes: bool,
    mutation: F,
) -> Result<LockPlan>
where
    T: LockTarget + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let kind = target.lock_kind();
    let observed = target.observed_lock(id).await?;
    let plan = LockPlan::new(observed, desired_locked, has_changes);
    debug!(kind, id, observed, desired_locked, has_changes, ?plan, "Lock plan");

    if plan.unlock_first {
        info!(kind, id, "Unlocking before mutation");
        unlock_and_wait(target, platform, id).await?;
    }
    if plan.mutate {
        mutation().await?;
    }
    if plan.relock {
        info!(kind, id, "Locking");
        target.set_lock(id, true).await?;
    }
    Ok(plan)
}

/// Unlock `id` ahead of deletion and wait for the unlock to be observed.
///
/// Returns `false` when the entity is already gone.
pub async fn release_for_delete<T: LockTarget + ?Sized>(target: &T, platform: &Platform, id: i32) -> Result<bool> {
    match target.observed_lock(id).await {
        Ok(true) => {
            info!(kind = target.lock_kind(), id, "Unlocking before delete");
            unlock_and_wait(target, platform, id).await?;
            Ok(true)
        }
        Ok(false) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
