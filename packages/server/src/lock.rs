//! Cluster-change lock: a single, non-reentrant, non-blocking lock guarding
//! every structural mutation (placement, lifecycle transitions, namespace
//! writes).
//!
//! Grounded on `sync_manager.lock(CLUSTER_CHANGES_LOCK, blocking=False)` in
//! `examples/original_source/src/cocaine-app/balancer.py` and on
//! `sync/__init__.py`, which injects a pluggable `SyncManager` (a real
//! deployment would back this with ZooKeeper or etcd; here it is a trait so
//! a single-process implementation is enough for tests). Release on every
//! exit path -- including cancellation -- falls out of Rust's `Drop`: a
//! cancelled future drops its locals, which drops the guard.

use std::sync::Arc;

use balancer_core::BalancerError;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A held lock. Releases automatically when dropped.
pub struct LockGuard {
    _inner: OwnedMutexGuard<()>,
}

/// A single named lock, acquired without blocking.
pub trait DistributedLock: Send + Sync {
    /// Attempt to acquire `key` immediately. Returns
    /// [`BalancerError::LockContended`] rather than waiting if another
    /// caller already holds it.
    fn try_lock(&self, key: &str) -> Result<LockGuard, BalancerError>;
}

/// A process-local lock table, keyed by lock name. Every caller in this
/// process shares the same underlying mutex for a given key, so two
/// concurrent mutations of the same couple (or of the cluster-wide
/// placement lock) correctly contend with each other.
#[derive(Default)]
pub struct LocalClusterLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// The well-known key guarding cluster-wide topology changes (build,
/// rebalance), mirroring `CLUSTER_CHANGES_LOCK` in the original.
pub const CLUSTER_CHANGES_LOCK: &str = "cluster-changes";

impl LocalClusterLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding a single couple's lifecycle transitions (freeze,
    /// unfreeze, repair, break), so unrelated couples never contend.
    pub fn couple_key(couple_id: &str) -> String {
        format!("couple:{couple_id}")
    }
}

impl DistributedLock for LocalClusterLock {
    fn try_lock(&self, key: &str) -> Result<LockGuard, BalancerError> {
        let mutex = self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        match mutex.try_lock_owned() {
            Ok(guard) => Ok(LockGuard { _inner: guard }),
            Err(_) => Err(BalancerError::LockContended),
        }
    }
}
