//! Module registry: one record per module key.
//!
//! A record is claimed before its dependencies are imported, so cyclic
//! imports bind to the module's not-yet-finished export record instead of
//! recursing. Export values themselves live in the evaluator. Concurrent importers of the same key wait on the
//! record's state channel. Waiting is deadlock-free: each top-level import is
//! a task, and a task whose wait-for chain leads back to itself gets the
//! placeholder instead of waiting.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Upper bound on wait-for chain hops examined per claim.
const MAX_WAIT_CHAIN: usize = 64;

/// Identity of one top-level import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Evaluating,
    Ready,
    Failed(String),
}

#[derive(Debug)]
pub struct ModuleRecord {
    key: String,
    owner: TaskId,
    state: watch::Sender<RecordState>,
}

impl ModuleRecord {
    fn new(key: &str, owner: TaskId) -> Self {
        let (state, _) = watch::channel(RecordState::Evaluating);
        Self {
            key: key.to_string(),
            owner,
            state,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    #[must_use]
    pub fn state(&self) -> RecordState {
        self.state.borrow().clone()
    }
}

/// Outcome of [`ModuleRegistry::claim`].
#[derive(Debug)]
pub enum Claim {
    /// Already evaluated.
    Ready,
    /// Being evaluated further up this task's own import chain, or by a task
    /// waiting on this one. The importer binds to the unfinished record.
    InProgress,
    /// Being evaluated by another task; wait with [`ModuleRegistry::wait`].
    Wait(Arc<ModuleRecord>),
    /// Newly created; the caller evaluates it and then calls
    /// [`ModuleRegistry::finish`] or [`ModuleRegistry::fail`].
    Owner(Arc<ModuleRecord>),
}

/// Session-wide module records keyed by `name@version/path`.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    records: DashMap<String, Arc<ModuleRecord>>,
    /// Task → key it is currently waiting on.
    waiting: DashMap<TaskId, String>,
    next_task: AtomicU64,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a task id for a new top-level import.
    pub fn next_task(&self) -> TaskId {
        TaskId(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    /// Claim `key` for `task`, registering a record if the key is new.
    pub fn claim(&self, key: &str, task: TaskId) -> Claim {
        let record = match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                let record = Arc::new(ModuleRecord::new(key, task));
                slot.insert(Arc::clone(&record));
                trace!(key, task = task.get(), "claimed module");
                return Claim::Owner(record);
            }
            Entry::Occupied(slot) => Arc::clone(slot.get()),
        };

        match record.state() {
            RecordState::Ready => Claim::Ready,
            RecordState::Failed(_) => Claim::Wait(record),
            RecordState::Evaluating if record.owner == task => {
                trace!(key, task = task.get(), "cyclic import");
                Claim::InProgress
            }
            RecordState::Evaluating => {
                // Register before walking the chain so that of two tasks
                // about to wait on each other at least one sees the cycle.
                self.waiting.insert(task, key.to_string());
                if self.leads_to(record.owner, task) {
                    self.waiting.remove(&task);
                    debug!(key, task = task.get(), "cross-task cycle, binding unfinished record");
                    Claim::InProgress
                } else {
                    Claim::Wait(record)
                }
            }
        }
    }

    /// Whether following the wait-for chain from `from` reaches `target`.
    fn leads_to(&self, from: TaskId, target: TaskId) -> bool {
        let mut current = from;
        for _ in 0..MAX_WAIT_CHAIN {
            if current == target {
                return true;
            }
            let Some(key) = self.waiting.get(&current).map(|k| k.value().clone()) else {
                return false;
            };
            let Some(owner) = self.records.get(&key).map(|r| r.owner) else {
                return false;
            };
            current = owner;
        }
        false
    }

    /// Wait until `record` leaves the evaluating state.
    ///
    /// # Errors
    /// Returns [`Error::ImportFailed`] if the owning import failed.
    pub async fn wait(&self, record: &ModuleRecord, task: TaskId) -> Result<()> {
        let mut rx = record.state.subscribe();
        let state = rx
            .wait_for(|s| *s != RecordState::Evaluating)
            .await
            .map(|s| s.clone());
        self.waiting.remove(&task);

        match state {
            Ok(RecordState::Ready) => Ok(()),
            Ok(RecordState::Failed(message)) => Err(Error::ImportFailed {
                key: record.key.clone(),
                message,
            }),
            Ok(RecordState::Evaluating) | Err(_) => Err(Error::ImportFailed {
                key: record.key.clone(),
                message: "import abandoned".to_string(),
            }),
        }
    }

    /// Mark the record ready and wake its waiters.
    pub fn finish(&self, record: &ModuleRecord) {
        record.state.send_replace(RecordState::Ready);
        trace!(key = %record.key, "module ready");
    }

    /// Evict a failed record and wake its waiters.
    pub fn fail(&self, record: &Arc<ModuleRecord>, message: String) {
        self.records
            .remove_if(&record.key, |_, r| Arc::ptr_eq(r, record));
        record.state.send_replace(RecordState::Failed(message));
        debug!(key = %record.key, "module failed, record evicted");
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ModuleRecord>> {
        self.records.get(key).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_owner_then_cycle_then_ready() {
        let registry = ModuleRegistry::new();
        let task = registry.next_task();

        let Claim::Owner(record) = registry.claim("a@1/index.js", task) else {
            panic!("first claim should own the record");
        };
        assert!(matches!(
            registry.claim("a@1/index.js", task),
            Claim::InProgress
        ));

        registry.finish(&record);
        let other = registry.next_task();
        assert!(matches!(registry.claim("a@1/index.js", other), Claim::Ready));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_waiter_woken_on_finish() {
        let registry = Arc::new(ModuleRegistry::new());
        let (t1, t2) = (registry.next_task(), registry.next_task());
        let Claim::Owner(record) = registry.claim("k", t1) else {
            panic!("expected owner");
        };
        let Claim::Wait(waiting) = registry.claim("k", t2) else {
            panic!("expected wait");
        };

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait(&waiting, t2).await })
        };
        tokio::task::yield_now().await;
        registry.finish(&record);
        waiter.await.unwrap().unwrap();
        assert_eq!(record.state(), RecordState::Ready);
    }

    #[tokio::test]
    async fn test_failure_evicts_and_wakes_waiters() {
        let registry = ModuleRegistry::new();
        let (t1, t2) = (registry.next_task(), registry.next_task());
        let Claim::Owner(record) = registry.claim("k", t1) else {
            panic!("expected owner");
        };
        let Claim::Wait(waiting) = registry.claim("k", t2) else {
            panic!("expected wait");
        };
        registry.fail(&record, "boom".to_string());
        let err = registry.wait(&waiting, t2).await.unwrap_err();
        assert!(matches!(err, Error::ImportFailed { ref message, .. } if message == "boom"));
        assert!(registry.get("k").is_none());
        assert!(matches!(registry.claim("k", t2), Claim::Owner(_)));
    }

    #[test]
    fn test_cross_task_cycle_binds_unfinished_record() {
        let registry = ModuleRegistry::new();
        let (t1, t2) = (registry.next_task(), registry.next_task());
        let Claim::Owner(_a) = registry.claim("a", t1) else {
            panic!("expected owner");
        };
        let Claim::Owner(_b) = registry.claim("b", t2) else {
            panic!("expected owner");
        };
        // t1 (evaluating a) waits on b.
        assert!(matches!(registry.claim("b", t1), Claim::Wait(_)));
        // t2 (evaluating b) now needs a: waiting would deadlock.
        assert!(matches!(registry.claim("a", t2), Claim::InProgress));
    }
}
