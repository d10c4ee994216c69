//! Background refresh worker: periodically samples every known group's
//! nodes and folds the result into the registries.
//!
//! Grounded on the teacher's `service::worker::BackgroundWorker` /
//! `network::module::NetworkModule` deferred-startup shape (`new` then
//! `run`), generalized from a stub into the one recurring job this control
//! plane needs. Kept off the request-accepting path, matching the
//! concurrency model's separation between request handling and periodic
//! maintenance.

use std::sync::Arc;

use balancer_core::{Couple, CoupleMeta, CoupleStatus, GroupStatus};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::collaborators::StorageDaemonClient;
use crate::state::ClusterState;

pub struct RefreshWorker {
    state: Arc<ClusterState>,
    storage: Arc<dyn StorageDaemonClient>,
    interval: std::time::Duration,
}

impl RefreshWorker {
    pub fn new(state: Arc<ClusterState>, storage: Arc<dyn StorageDaemonClient>, interval: std::time::Duration) -> Self {
        RefreshWorker { state, storage, interval }
    }

    /// Run the refresh loop until the given cancellation future resolves.
    /// Each tick samples every group currently known to the registry;
    /// groups added mid-run are picked up on the following tick.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn refresh_once(&self) {
        for group_id in self.known_group_ids() {
            match self.storage.sample_node(group_id).await {
                Ok(samples) => self.apply_samples(group_id, samples),
                Err(e) => warn!(group_id, error = %e, "counter refresh failed for group"),
            }
        }
        self.recalc_all_couple_statuses().await;
        debug!("refresh pass complete");
    }

    /// Recompute every couple's status as a pure function of its current
    /// member statuses and whether their persisted meta agrees. Mirrors
    /// `update_status` being invoked on every cluster-state refresh, not
    /// just at couple-build time, so a node backend going bad or meta
    /// drifting between members is reflected without an explicit admin
    /// action.
    async fn recalc_all_couple_statuses(&self) {
        for couple_id in self.state.all_couple_ids() {
            let Some(couple) = self.state.get_couple(&couple_id) else {
                continue;
            };
            let member_statuses: Vec<GroupStatus> = couple
                .group_ids
                .iter()
                .filter_map(|&id| self.state.get_group(id))
                .map(|g| g.status)
                .collect();
            let meta_agrees = self.couple_meta_agrees(&couple).await;
            let new_status = CoupleStatus::derive(&member_statuses, couple.frozen, meta_agrees);
            if new_status != couple.status {
                let mut updated = couple;
                updated.status = new_status;
                self.state.upsert_couple(updated);
            }
        }
    }

    /// Read every member group's persisted meta back and check it decodes
    /// and agrees across the whole couple. A read failure or decode error on
    /// any member is treated as disagreement, since it means the couple's
    /// true state can't currently be confirmed.
    async fn couple_meta_agrees(&self, couple: &Couple) -> bool {
        let mut metas = Vec::with_capacity(couple.group_ids.len());
        for &group_id in &couple.group_ids {
            match self.storage.read_meta(group_id).await {
                Ok(Some(bytes)) => match CoupleMeta::decode(&bytes) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => {
                        warn!(group_id, error = %e, "couple meta failed to decode during status recalc");
                        return false;
                    }
                },
                Ok(None) => return false,
                Err(e) => {
                    warn!(group_id, error = %e, "couple meta read failed during status recalc");
                    return false;
                }
            }
        }
        metas.windows(2).all(|w| w[0] == w[1])
    }

    fn known_group_ids(&self) -> Vec<u32> {
        let mut ids = self.state.uncoupled_group_ids();
        for couple_id in self.state.all_couple_ids() {
            if let Some(couple) = self.state.get_couple(&couple_id) {
                ids.extend(couple.group_ids.iter().copied());
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn apply_samples(&self, group_id: u32, samples: Vec<balancer_core::RawNodeSample>) {
        let Some(mut group) = self.state.get_group(group_id) else {
            return;
        };
        if group.nodes.len() < samples.len() {
            group.nodes.resize(samples.len(), balancer_core::NodeState::default());
        }
        for (node, sample) in group.nodes.iter_mut().zip(samples) {
            node.observe(sample);
        }
        group.status = self.recalc_status(group_id, group.status);
        self.state.upsert_group(group);
    }

    /// Mirrors `update_status_recalc`: a group's membership in the couple
    /// registry, not its own local state, decides whether it's `Init` or
    /// `Coupled`. A group already marked `Bad`/`Broken` by health checks
    /// external to this worker is left untouched.
    fn recalc_status(&self, group_id: u32, current: balancer_core::GroupStatus) -> balancer_core::GroupStatus {
        use balancer_core::GroupStatus;
        if matches!(current, GroupStatus::Bad | GroupStatus::Broken) {
            return current;
        }
        let in_couple = self
            .state
            .all_couple_ids()
            .into_iter()
            .filter_map(|id| self.state.get_couple(&id))
            .any(|c| c.group_ids.contains(&group_id));
        if in_couple {
            GroupStatus::Coupled
        } else {
            GroupStatus::Init
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{DistributedLock, LocalClusterLock};
    use async_trait::async_trait;
    use balancer_core::{GroupStatus, RawNodeSample, Result};

    struct FakeStorage;

    #[async_trait]
    impl StorageDaemonClient for FakeStorage {
        async fn write_meta(&self, _group_id: u32, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn remove_meta(&self, _group_id: u32) -> Result<()> {
            Ok(())
        }
        async fn read_meta(&self, _group_id: u32) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn sample_node(&self, _group_id: u32) -> Result<Vec<RawNodeSample>> {
            Ok(vec![RawNodeSample {
                blocks_available: 100,
                block_size: 1024,
                blocks_total: 200,
                bytes_written: 10,
                bytes_read: 0,
                du1: Some(10),
                la1: None,
                timestamp_secs: 1,
            }])
        }
    }

    #[tokio::test]
    async fn refresh_once_applies_samples_to_known_groups() {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(balancer_core::Group {
            id: 1,
            status: GroupStatus::Init,
            nodes: vec![],
            total_space_kb: 0.0,
        });
        let worker = RefreshWorker::new(state.clone(), Arc::new(FakeStorage), std::time::Duration::from_secs(60));
        worker.refresh_once().await;
        let group = state.get_group(1).unwrap();
        assert_eq!(group.nodes.len(), 1);
        assert!(group.nodes[0].has_sample());
    }

    #[tokio::test]
    async fn refresh_promotes_coupled_group_status() {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(balancer_core::Group {
            id: 1,
            status: GroupStatus::Init,
            nodes: vec![],
            total_space_kb: 0.0,
        });
        state.upsert_couple(balancer_core::Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        let worker = RefreshWorker::new(state.clone(), Arc::new(FakeStorage), std::time::Duration::from_secs(60));
        worker.refresh_once().await;
        assert_eq!(state.get_group(1).unwrap().status, GroupStatus::Coupled);
    }

    #[test]
    fn no_contention_between_unrelated_couple_locks() {
        let lock = LocalClusterLock::new();
        let _a = lock.try_lock(&LocalClusterLock::couple_key("1:2")).unwrap();
        assert!(lock.try_lock(&LocalClusterLock::couple_key("5:6")).is_ok());
    }

    struct MetaStorage {
        metas: std::collections::HashMap<u32, Vec<u8>>,
    }

    #[async_trait]
    impl StorageDaemonClient for MetaStorage {
        async fn write_meta(&self, _group_id: u32, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn remove_meta(&self, _group_id: u32) -> Result<()> {
            Ok(())
        }
        async fn read_meta(&self, group_id: u32) -> Result<Option<Vec<u8>>> {
            Ok(self.metas.get(&group_id).cloned())
        }
        async fn sample_node(&self, _group_id: u32) -> Result<Vec<RawNodeSample>> {
            Ok(vec![])
        }
    }

    fn group(id: u32, status: GroupStatus) -> balancer_core::Group {
        balancer_core::Group { id, status, nodes: vec![], total_space_kb: 0.0 }
    }

    fn couple() -> Couple {
        Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: false,
        }
    }

    #[tokio::test]
    async fn couple_status_stays_coupled_when_members_healthy_and_meta_agrees() {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(group(1, GroupStatus::Coupled));
        state.upsert_group(group(2, GroupStatus::Coupled));
        state.upsert_couple(couple());

        let meta = CoupleMeta { namespace: "default".to_string(), couple_group_ids: [1, 2].into_iter().collect(), frozen: false, version: 1 };
        let bytes = meta.encode().unwrap();
        let storage = Arc::new(MetaStorage { metas: [(1, bytes.clone()), (2, bytes)].into_iter().collect() });

        let worker = RefreshWorker::new(state.clone(), storage, std::time::Duration::from_secs(60));
        worker.recalc_all_couple_statuses().await;
        assert_eq!(state.get_couple("1:2").unwrap().status, CoupleStatus::Coupled);
    }

    #[tokio::test]
    async fn couple_status_degrades_to_bad_on_disagreeing_meta() {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(group(1, GroupStatus::Coupled));
        state.upsert_group(group(2, GroupStatus::Coupled));
        state.upsert_couple(couple());

        let meta_a = CoupleMeta { namespace: "default".to_string(), couple_group_ids: [1, 2].into_iter().collect(), frozen: false, version: 1 };
        let meta_b = CoupleMeta { namespace: "default".to_string(), couple_group_ids: [1, 2].into_iter().collect(), frozen: false, version: 2 };
        let storage = Arc::new(MetaStorage {
            metas: [(1, meta_a.encode().unwrap()), (2, meta_b.encode().unwrap())].into_iter().collect(),
        });

        let worker = RefreshWorker::new(state.clone(), storage, std::time::Duration::from_secs(60));
        worker.recalc_all_couple_statuses().await;
        assert_eq!(state.get_couple("1:2").unwrap().status, CoupleStatus::Bad);
    }

    #[tokio::test]
    async fn couple_status_degrades_to_broken_when_a_member_is_broken() {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(group(1, GroupStatus::Broken));
        state.upsert_group(group(2, GroupStatus::Coupled));
        state.upsert_couple(couple());

        let meta = CoupleMeta { namespace: "default".to_string(), couple_group_ids: [1, 2].into_iter().collect(), frozen: false, version: 1 };
        let bytes = meta.encode().unwrap();
        let storage = Arc::new(MetaStorage { metas: [(1, bytes.clone()), (2, bytes)].into_iter().collect() });

        let worker = RefreshWorker::new(state.clone(), storage, std::time::Duration::from_secs(60));
        worker.recalc_all_couple_statuses().await;
        assert_eq!(state.get_couple("1:2").unwrap().status, CoupleStatus::Broken);
    }
}
