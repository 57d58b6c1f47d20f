//! Set-valued relations between entities.
//!
//! A binding is a platform row linking two entities. Some relations unbind
//! by the row's own id rather than the member's, so the observed rows are
//! always read first and carried into the unbind call.

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use taikun_core::Result;

/// Members to add and remove to turn `observed` into `desired`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDelta<K> {
    pub to_add: Vec<K>,
    pub to_remove: Vec<K>,
}

impl<K: Ord + Clone> SetDelta<K> {
    pub fn compute(desired: &BTreeSet<K>, observed: &BTreeSet<K>) -> Self {
        Self {
            to_add: desired.difference(observed).cloned().collect(),
            to_remove: observed.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// One observed binding row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding<K> {
    /// The row's own id, for relations that unbind by it.
    pub binding_id: Option<i32>,
    pub member: K,
}

impl<K> Binding<K> {
    pub const fn new(binding_id: Option<i32>, member: K) -> Self {
        Self { binding_id, member }
    }
}

/// Platform calls for one relation, seen from its owning entity.
#[async_trait]
pub trait Binder: Send + Sync {
    type Member: Ord + Clone + Debug + Send + Sync;

    /// Relation name used in logs, e.g. `project flavors`.
    fn relation(&self) -> String;

    async fn observed(&self) -> Result<Vec<Binding<Self::Member>>>;

    async fn bind(&self, members: &[Self::Member]) -> Result<()>;

    async fn unbind(&self, bindings: &[Binding<Self::Member>]) -> Result<()>;
}

/// Converge `binder`'s relation to `desired`.
///
/// Removals are issued before additions so a member whose per-binding
/// attributes changed is rebound rather than rejected as a duplicate.
pub async fn reconcile_bindings<B>(binder: &B, desired: &BTreeSet<B::Member>) -> Result<SetDelta<B::Member>>
where
    B: Binder + ?Sized,
{
    let observed = binder.observed().await?;
    let observed_set: BTreeSet<B::Member> = observed.iter().map(|b| b.member.clone()).collect();
    let delta = SetDelta::compute(desired, &observed_set);
    if delta.is_empty() {
        return Ok(delta);
    }

    let relation = binder.relation();
    info!(
        %relation,
        add = delta.to_add.len(),
        remove = delta.to_remove.len(),
        "Reconciling bindings"
    );
    if !delta.to_remove.is_empty() {
        let doomed: Vec<Binding<B::Member>> = observed
            .into_iter()
            .filter(|b| delta.to_remove.contains(&b.member))
            .collect();
        binder.unbind(&doomed).await?;
    }
    if !delta.to_add.is_empty() {
        binder.bind(&delta.to_add).await?;
    }
    Ok(delta)
}

/// Desired label `{key, value}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Label as the platform stores it, with its own id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservedLabel {
    pub id: i32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelRef {
    pub id: i32,
}

/// Label changes for an update that replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDiff {
    pub labels_to_add: Vec<Label>,
    pub labels_to_delete: Vec<LabelRef>,
}

impl LabelDiff {
    /// Delete every observed label by id and add every desired one.
    pub fn replace_all(observed: &[ObservedLabel], desired: &[Label]) -> Self {
        Self {
            labels_to_add: desired.to_vec(),
            labels_to_delete: observed.iter().map(|l| LabelRef { id: l.id }).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn set(items: &[i32]) -> BTreeSet<i32> {
        items.iter().copied().collect()
    }

    #[test]
    fn delta_is_plain_set_difference() {
        let delta = SetDelta::compute(&set(&[1, 2, 3]), &set(&[3, 4]));
        assert_eq!(delta.to_add, vec![1, 2]);
        assert_eq!(delta.to_remove, vec![4]);
        assert!(SetDelta::compute(&set(&[1]), &set(&[1])).is_empty());
    }

    #[test]
    fn label_replace_adds_all_desired_and_deletes_all_observed() {
        let observed = vec![
            ObservedLabel {
                id: 11,
                key: "a".into(),
                value: "1".into(),
            },
            ObservedLabel {
                id: 12,
                key: "b".into(),
                value: "2".into(),
            },
        ];
        let desired = vec![Label::new("b", "2"), Label::new("c", "3")];
        let diff = LabelDiff::replace_all(&observed, &desired);
        assert_eq!(
            serde_json::to_value(&diff).unwrap(),
            json!({
                "labelsToAdd": [{"key": "b", "value": "2"}, {"key": "c", "value": "3"}],
                "labelsToDelete": [{"id": 11}, {"id": 12}]
            })
        );
    }

    /// Relation held in memory; binding ids are allocated on bind.
    struct MemoryBinder {
        rows: Mutex<Vec<Binding<i32>>>,
        next_id: Mutex<i32>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MemoryBinder {
        fn new(members: &[i32]) -> Self {
            let rows = members
                .iter()
                .enumerate()
                .map(|(i, m)| Binding::new(Some(100 + i32::try_from(i).unwrap()), *m))
                .collect();
            Self {
                rows: Mutex::new(rows),
                next_id: Mutex::new(500),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn members(&self) -> BTreeSet<i32> {
            self.rows.lock().unwrap().iter().map(|b| b.member).collect()
        }
    }

    #[async_trait]
    impl Binder for MemoryBinder {
        type Member = i32;

        fn relation(&self) -> String {
            "test relation".into()
        }

        async fn observed(&self) -> Result<Vec<Binding<i32>>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn bind(&self, members: &[i32]) -> Result<()> {
            self.calls.lock().unwrap().push("bind");
            let mut rows = self.rows.lock().unwrap();
            let mut next = self.next_id.lock().unwrap();
            for m in members {
                *next += 1;
                rows.push(Binding::new(Some(*next), *m));
            }
            Ok(())
        }

        async fn unbind(&self, bindings: &[Binding<i32>]) -> Result<()> {
            self.calls.lock().unwrap().push("unbind");
            // The platform removes by binding id, not by member.
            let ids: Vec<Option<i32>> = bindings.iter().map(|b| b.binding_id).collect();
            self.rows
                .lock()
                .unwrap()
                .retain(|b| !ids.contains(&b.binding_id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn converges_to_desired_from_any_start() {
        let starts: [&[i32]; 4] = [&[], &[1, 2, 3], &[4, 5], &[2, 9]];
        let desired = set(&[2, 3, 7]);
        for start in starts {
            let binder = MemoryBinder::new(start);
            reconcile_bindings(&binder, &desired).await.unwrap();
            assert_eq!(binder.members(), desired, "start {start:?}");
        }
    }

    #[tokio::test]
    async fn no_calls_when_already_converged() {
        let binder = MemoryBinder::new(&[1, 2]);
        let delta = reconcile_bindings(&binder, &set(&[1, 2])).await.unwrap();
        assert!(delta.is_empty());
        assert!(binder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removals_precede_additions() {
        let binder = MemoryBinder::new(&[1]);
        reconcile_bindings(&binder, &set(&[2])).await.unwrap();
        assert_eq!(*binder.calls.lock().unwrap(), vec!["unbind", "bind"]);
    }
}
