//! Couple lifecycle: build, freeze, unfreeze, repair, and break.
//!
//! Grounded on the `build_couples`, `freeze_couple`/`unfreeze_couple`,
//! `repair_groups`, and `break_couple` handlers in
//! `examples/original_source/src/cocaine-app/balancer.py`. Every transition
//! acquires the cluster-change lock (or the couple-scoped lock, for
//! transitions that touch only one couple) before mutating the registries,
//! and every transition that changes the persisted meta goes through
//! [`crate::meta_writer::MetaWriter`].

use std::collections::BTreeSet;
use std::sync::Arc;

use balancer_core::{
    bucket_by_total_space, choose_groups_to_couple, couple_id, BalancerError, Couple, CoupleMeta,
    CoupleStatus, GroupStatus, GroupTopology, Result,
};
use tracing::info;

use crate::lock::{DistributedLock, LocalClusterLock, CLUSTER_CHANGES_LOCK};
use crate::meta_writer::MetaWriter;
use crate::state::ClusterState;

pub struct BuildOptions {
    pub namespace: String,
    pub replicas: usize,
    pub forbid_sharing: bool,
    pub mandatory_groups: Vec<u32>,
    pub frozen: bool,
    pub dry_run: bool,
}

pub struct LifecycleService {
    state: Arc<ClusterState>,
    lock: Arc<dyn DistributedLock>,
    meta_writer: Arc<MetaWriter>,
    total_space_tolerance: f64,
}

impl LifecycleService {
    pub fn new(
        state: Arc<ClusterState>,
        lock: Arc<dyn DistributedLock>,
        meta_writer: Arc<MetaWriter>,
        total_space_tolerance: f64,
    ) -> Self {
        LifecycleService { state, lock, meta_writer, total_space_tolerance }
    }

    /// Select and, unless `dry_run`, commit a new couple. Mirrors
    /// `build_couples`: acquire the cluster-wide lock, bucket the uncoupled
    /// groups by total space, pick the best-scoring placement, and -- for a
    /// real (non-dry-run) build -- write the couple meta to every member
    /// before registering the couple.
    pub async fn build_couple(&self, opts: BuildOptions) -> Result<Couple> {
        let _guard = self.lock.try_lock(CLUSTER_CHANGES_LOCK)?;

        for &group_id in &opts.mandatory_groups {
            if !self.state.uncoupled_group_ids().contains(&group_id) {
                return Err(BalancerError::GroupAlreadyCoupled { group_id });
            }
        }

        let candidates = self.state.uncoupled_group_total_space();
        let buckets = bucket_by_total_space(&candidates, self.total_space_tolerance);
        let topology: std::sync::Arc<GroupTopology> = self.state.topology();

        let already_placed: Vec<u32> = self
            .state
            .couples_in_namespace(&opts.namespace)
            .iter()
            .flat_map(|c| c.group_ids.iter().copied())
            .collect();

        let chosen = choose_groups_to_couple(
            &buckets,
            opts.replicas,
            &topology,
            topology.level_count(),
            opts.forbid_sharing,
            &opts.mandatory_groups,
            &already_placed,
        )
        .ok_or_else(|| BalancerError::NoFeasiblePlacement { namespace: opts.namespace.clone() })?;

        let group_ids: BTreeSet<u32> = chosen.into_iter().collect();
        let id = couple_id(&group_ids);

        let couple = Couple {
            id: id.clone(),
            namespace: opts.namespace.clone(),
            group_ids: group_ids.clone(),
            status: CoupleStatus::Init,
            frozen: opts.frozen,
        };

        if opts.dry_run {
            return Ok(couple);
        }

        let meta = CoupleMeta {
            namespace: opts.namespace,
            couple_group_ids: group_ids.clone(),
            frozen: opts.frozen,
            version: 1,
        };
        let ids: Vec<u32> = group_ids.iter().copied().collect();
        self.meta_writer.write(&ids, &meta).await?;

        // Meta just landed identically on every member, so promote them to
        // `Coupled` immediately rather than waiting for the next refresh
        // tick to notice the new couple registration.
        let mut member_statuses = Vec::with_capacity(ids.len());
        for &group_id in &ids {
            if let Some(mut group) = self.state.get_group(group_id) {
                group.status = GroupStatus::Coupled;
                member_statuses.push(group.status);
                self.state.upsert_group(group);
            } else {
                member_statuses.push(GroupStatus::Coupled);
            }
        }

        let mut committed = couple;
        committed.status = CoupleStatus::derive(&member_statuses, opts.frozen, true);
        self.state.upsert_couple(committed.clone());
        info!(couple_id = %id, status = ?committed.status, "couple built");
        Ok(committed)
    }

    /// Set `frozen` to `target`, rejecting a no-op transition the way
    /// `freeze_couple`/`unfreeze_couple` guard against re-freezing an
    /// already-frozen couple. Recomputes the couple's status immediately
    /// rather than waiting for the next refresh tick.
    pub async fn set_frozen(&self, couple_id: &str, target: bool) -> Result<()> {
        let _guard = self.lock.try_lock(&LocalClusterLock::couple_key(couple_id))?;
        let mut couple = self
            .state
            .get_couple(couple_id)
            .ok_or_else(|| BalancerError::UnknownCouple { couple_id: couple_id.to_string() })?;

        if couple.frozen == target {
            return Err(BalancerError::AlreadyInState {
                couple_id: couple_id.to_string(),
                state: if target { "frozen" } else { "unfrozen" }.to_string(),
            });
        }

        let meta = CoupleMeta {
            namespace: couple.namespace.clone(),
            couple_group_ids: couple.group_ids.clone(),
            frozen: target,
            version: 1,
        };
        let ids: Vec<u32> = couple.group_ids.iter().copied().collect();
        self.meta_writer.write(&ids, &meta).await?;

        couple.frozen = target;
        let member_statuses: Vec<GroupStatus> =
            ids.iter().filter_map(|&id| self.state.get_group(id)).map(|g| g.status).collect();
        couple.status = CoupleStatus::derive(&member_statuses, couple.frozen, true);
        self.state.upsert_couple(couple);
        Ok(())
    }

    /// Repair a single bad group back into its couple. Mirrors
    /// `repair_groups`: the group must belong to exactly one couple, and
    /// the couple's `frozen` flag is inherited unchanged. Promotes the
    /// repaired group to `Coupled` and recomputes the couple's status
    /// immediately, the same as a fresh `build_couple`.
    pub async fn repair_group(&self, couple_id: &str, group_id: u32) -> Result<()> {
        let _guard = self.lock.try_lock(&LocalClusterLock::couple_key(couple_id))?;
        let couple = self
            .state
            .get_couple(couple_id)
            .ok_or_else(|| BalancerError::UnknownCouple { couple_id: couple_id.to_string() })?;

        if !couple.group_ids.contains(&group_id) {
            return Err(BalancerError::UnknownGroup { group_id });
        }

        let meta = CoupleMeta {
            namespace: couple.namespace.clone(),
            couple_group_ids: couple.group_ids.clone(),
            frozen: couple.frozen,
            version: 1,
        };
        self.meta_writer.write(&[group_id], &meta).await?;

        if let Some(mut group) = self.state.get_group(group_id) {
            group.status = GroupStatus::Coupled;
            self.state.upsert_group(group);
        }
        let mut couple = couple;
        let member_statuses: Vec<GroupStatus> =
            couple.group_ids.iter().filter_map(|&id| self.state.get_group(id)).map(|g| g.status).collect();
        couple.status = CoupleStatus::derive(&member_statuses, couple.frozen, true);
        self.state.upsert_couple(couple);
        Ok(())
    }

    /// `group_detach_node`: remove one node backend from a group's member
    /// list by its index. Does not touch couple membership or meta; a
    /// subsequent refresh simply stops sampling the detached backend.
    pub fn detach_node(&self, group_id: u32, node_index: usize) -> Result<()> {
        let mut group = self
            .state
            .get_group(group_id)
            .ok_or(BalancerError::UnknownGroup { group_id })?;
        if node_index >= group.nodes.len() {
            return Err(BalancerError::BadRequest {
                reason: format!("group {group_id} has no node backend at index {node_index}"),
            });
        }
        group.nodes.remove(node_index);
        self.state.upsert_group(group);
        Ok(())
    }

    /// Permanently dissolve a couple: remove meta from every member group,
    /// then drop the couple from the registry. Mirrors `break_couple` /
    /// `kill_symm_group`. `confirm` must match the exact confirmation
    /// string for the couple's current good/bad status, in either the bare
    /// (`1:2:3`) or bracketed (`[1:2:3]`) couple-id form; no metadata is
    /// touched if the confirmation does not match.
    pub async fn break_couple(&self, couple_id: &str, confirm: &str) -> Result<()> {
        let _guard = self.lock.try_lock(&LocalClusterLock::couple_key(couple_id))?;
        let couple = self
            .state
            .get_couple(couple_id)
            .ok_or_else(|| BalancerError::UnknownCouple { couple_id: couple_id.to_string() })?;

        let quality = if matches!(couple.status, CoupleStatus::Bad | CoupleStatus::Broken) {
            "bad"
        } else {
            "good"
        };
        let expected_bare = format!("Yes, I want to break {quality} couple {couple_id}");
        let expected_bracketed = format!("Yes, I want to break {quality} couple [{couple_id}]");
        if confirm != expected_bare && confirm != expected_bracketed {
            return Err(BalancerError::BadRequest {
                reason: "incorrect confirmation string".to_string(),
            });
        }

        let ids: Vec<u32> = couple.group_ids.iter().copied().collect();
        self.meta_writer.remove(couple_id, &ids).await?;
        self.state.remove_couple(couple_id);
        info!(couple_id, "couple broken");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StorageDaemonClient;
    use async_trait::async_trait;
    use balancer_core::{Group, GroupStatus, NodeLocation, RawNodeSample, TopologySchema};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStorage {
        written: Mutex<HashMap<u32, Vec<u8>>>,
    }

    #[async_trait]
    impl StorageDaemonClient for FakeStorage {
        async fn write_meta(&self, group_id: u32, bytes: &[u8]) -> Result<()> {
            self.written.lock().insert(group_id, bytes.to_vec());
            Ok(())
        }
        async fn remove_meta(&self, group_id: u32) -> Result<()> {
            self.written.lock().remove(&group_id);
            Ok(())
        }
        async fn read_meta(&self, group_id: u32) -> Result<Option<Vec<u8>>> {
            Ok(self.written.lock().get(&group_id).cloned())
        }
        async fn sample_node(&self, _group_id: u32) -> Result<Vec<RawNodeSample>> {
            Ok(vec![])
        }
    }

    fn make_service() -> (LifecycleService, Arc<ClusterState>) {
        let state = Arc::new(ClusterState::new());
        state.upsert_group(Group { id: 1, status: GroupStatus::Init, nodes: vec![], total_space_kb: 1000.0 });
        state.upsert_group(Group { id: 2, status: GroupStatus::Init, nodes: vec![], total_space_kb: 1000.0 });

        let schema = TopologySchema::default();
        let mut topo = GroupTopology::new();
        topo.insert(&schema, &NodeLocation { group_id: 1, levels: vec!["dc1".into(), "h1".into()], host_full_path: "h1".into(), filesystem_id: "fs0".into() });
        topo.insert(&schema, &NodeLocation { group_id: 2, levels: vec!["dc2".into(), "h2".into()], host_full_path: "h2".into(), filesystem_id: "fs0".into() });
        state.replace_topology(topo);

        let lock: Arc<dyn DistributedLock> = Arc::new(LocalClusterLock::new());
        let storage = Arc::new(FakeStorage::default());
        let writer = Arc::new(MetaWriter::new(storage));
        (LifecycleService::new(state.clone(), lock, writer, 0.05), state)
    }

    #[tokio::test]
    async fn build_couple_commits_and_writes_meta() {
        let (service, state) = make_service();
        let opts = BuildOptions {
            namespace: "default".to_string(),
            replicas: 2,
            forbid_sharing: true,
            mandatory_groups: vec![],
            frozen: false,
            dry_run: false,
        };
        let couple = service.build_couple(opts).await.unwrap();
        assert_eq!(couple.id, "1:2");
        assert!(state.get_couple("1:2").is_some());
    }

    #[tokio::test]
    async fn dry_run_does_not_commit() {
        let (service, state) = make_service();
        let opts = BuildOptions {
            namespace: "default".to_string(),
            replicas: 2,
            forbid_sharing: true,
            mandatory_groups: vec![],
            frozen: false,
            dry_run: true,
        };
        service.build_couple(opts).await.unwrap();
        assert!(state.get_couple("1:2").is_none());
    }

    #[tokio::test]
    async fn freezing_an_already_frozen_couple_errors() {
        let (service, state) = make_service();
        state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: true,
        });
        let result = service.set_frozen("1:2", true).await;
        assert!(matches!(result, Err(BalancerError::AlreadyInState { .. })));
    }

    #[tokio::test]
    async fn break_couple_removes_from_registry() {
        let (service, state) = make_service();
        state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: false,
        });
        service.break_couple("1:2", "Yes, I want to break good couple 1:2").await.unwrap();
        assert!(state.get_couple("1:2").is_none());
    }

    #[tokio::test]
    async fn break_couple_rejects_wrong_confirmation() {
        let (service, state) = make_service();
        state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: false,
        });
        let result = service.break_couple("1:2", "nope").await;
        assert!(matches!(result, Err(BalancerError::BadRequest { .. })));
        assert!(state.get_couple("1:2").is_some());
    }

    #[tokio::test]
    async fn break_couple_accepts_bracketed_confirmation() {
        let (service, state) = make_service();
        state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: false,
        });
        service.break_couple("1:2", "Yes, I want to break good couple [1:2]").await.unwrap();
        assert!(state.get_couple("1:2").is_none());
    }

    #[test]
    fn detach_node_removes_backend_by_index() {
        let (service, state) = make_service();
        let mut group = state.get_group(1).unwrap();
        group.nodes.push(balancer_core::NodeState::default());
        state.upsert_group(group);
        service.detach_node(1, 0).unwrap();
        assert!(state.get_group(1).unwrap().nodes.is_empty());
    }

    #[test]
    fn detach_node_rejects_out_of_range_index() {
        let (service, _state) = make_service();
        assert!(matches!(service.detach_node(1, 5), Err(BalancerError::BadRequest { .. })));
    }

    #[tokio::test]
    async fn build_couple_rejects_already_coupled_mandatory_group() {
        let (service, state) = make_service();
        state.upsert_group(Group { id: 1, status: GroupStatus::Coupled, nodes: vec![], total_space_kb: 1000.0 });
        state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "default".to_string(),
            group_ids: BTreeSet::from([1, 2]),
            status: CoupleStatus::Coupled,
            frozen: false,
        });
        let opts = BuildOptions {
            namespace: "default".to_string(),
            replicas: 2,
            forbid_sharing: true,
            mandatory_groups: vec![1],
            frozen: false,
            dry_run: false,
        };
        let result = service.build_couple(opts).await;
        assert!(matches!(result, Err(BalancerError::GroupAlreadyCoupled { group_id: 1 })));
    }
}
