//! Process-wide registries: the in-memory source of truth for groups,
//! couples, namespaces, and the topology tree.
//!
//! Grounded on `ClusterState`/`ClusterPartitionTable` in the teacher's
//! `cluster/state.rs`: lock-free reads via `DashMap` and `ArcSwap`, with
//! mutation serialized by the cluster-change lock rather than by a mutex on
//! the registry itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use balancer_core::{Couple, Group, GroupStatus, GroupTopology, NamespaceSettings};
use dashmap::DashMap;

/// Process-wide state. Reads never block; every mutation is expected to
/// happen while the caller holds the relevant [`crate::lock::LockGuard`].
pub struct ClusterState {
    groups: DashMap<u32, Group>,
    couples: DashMap<String, Couple>,
    namespaces: DashMap<String, NamespaceSettings>,
    topology: ArcSwap<GroupTopology>,
    version: AtomicU64,
    /// High-water mark mirroring `MASTERMIND_MAX_GROUP_KEY`: the last group
    /// id handed out by [`ClusterState::reserve_group_numbers`].
    max_group_id: AtomicU64,
}

impl Default for ClusterState {
    fn default() -> Self {
        ClusterState {
            groups: DashMap::new(),
            couples: DashMap::new(),
            namespaces: DashMap::new(),
            topology: ArcSwap::from_pointee(GroupTopology::new()),
            version: AtomicU64::new(0),
            max_group_id: AtomicU64::new(0),
        }
    }
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Release) + 1
    }

    pub fn upsert_group(&self, group: Group) {
        self.groups.insert(group.id, group);
        self.bump_version();
    }

    pub fn get_group(&self, id: u32) -> Option<Group> {
        self.groups.get(&id).map(|g| g.clone())
    }

    pub fn uncoupled_group_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .groups
            .iter()
            .filter(|g| g.is_available_for_placement())
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn uncoupled_group_total_space(&self) -> std::collections::BTreeMap<u32, f64> {
        self.groups
            .iter()
            .filter(|g| g.is_available_for_placement())
            .map(|g| (g.id, g.total_space_kb))
            .collect()
    }

    pub fn upsert_couple(&self, couple: Couple) {
        self.couples.insert(couple.id.clone(), couple);
        self.bump_version();
    }

    pub fn get_couple(&self, id: &str) -> Option<Couple> {
        self.couples.get(id).map(|c| c.clone())
    }

    pub fn remove_couple(&self, id: &str) -> Option<Couple> {
        let removed = self.couples.remove(id).map(|(_, c)| c);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    pub fn couples_in_namespace(&self, namespace: &str) -> Vec<Couple> {
        self.couples.iter().filter(|c| c.namespace == namespace).map(|c| c.clone()).collect()
    }

    pub fn all_couple_ids(&self) -> Vec<String> {
        self.couples.iter().map(|c| c.id.clone()).collect()
    }

    pub fn upsert_namespace(&self, namespace: &str, settings: NamespaceSettings) {
        self.namespaces.insert(namespace.to_string(), settings);
        self.bump_version();
    }

    pub fn get_namespace(&self, namespace: &str) -> Option<NamespaceSettings> {
        self.namespaces.get(namespace).map(|s| s.clone())
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }

    pub fn delete_namespace(&self, namespace: &str) -> bool {
        let removed = self.namespaces.remove(namespace).is_some();
        if removed {
            self.bump_version();
        }
        removed
    }

    pub fn topology(&self) -> Arc<GroupTopology> {
        self.topology.load_full()
    }

    pub fn replace_topology(&self, topo: GroupTopology) {
        self.topology.store(Arc::new(topo));
        self.bump_version();
    }

    /// Atomically reserve `count` consecutive group ids, mirroring
    /// `get_next_group_number`'s persisted high-water mark. Two concurrent
    /// callers always receive disjoint ranges; the counter advances by
    /// exactly `count`.
    pub fn reserve_group_numbers(&self, count: u64) -> std::ops::Range<u64> {
        let start = self.max_group_id.fetch_add(count, Ordering::AcqRel) + 1;
        start..(start + count)
    }
}
