//! Request facade: the one entry point operator tooling calls into. Each
//! method here maps 1:1 to an RPC named in SPEC_FULL.md §6; the RPC
//! transport itself is an external collaborator and is not implemented in
//! this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use balancer_core::{
    compute_namespace_weights, merge_namespace_settings, validate_namespace_settings, BalancerError,
    Couple, CoupleAggregate, NamespaceSettings, NamespaceSettingsPatch, Result, StaticCoupleFacts,
    WeightDiagnostic, WeightEngineConfig,
};

use crate::collaborators::NamespaceSettingsStore;
use crate::lifecycle::{BuildOptions, LifecycleService};
use crate::state::ClusterState;

/// Per-namespace view returned by [`BalancerFacade::get_namespaces_states`].
#[derive(Debug, Default, Clone)]
pub struct NamespaceState {
    pub settings: Option<NamespaceSettings>,
    pub couples: Vec<Couple>,
    pub weights: BTreeMap<String, (u64, WeightDiagnostic)>,
}

/// One couple's weight entry as returned by
/// [`BalancerFacade::get_group_weights`]: the member group ids (in couple-id
/// order), the couple's write weight, the diagnostic behind it, and its
/// current free-space snapshot.
#[derive(Debug, Clone)]
pub struct GroupWeightEntry {
    pub group_ids: Vec<u32>,
    pub weight: u64,
    pub diagnostic: WeightDiagnostic,
    pub free_kb: f64,
}

pub struct BalancerFacade {
    state: Arc<ClusterState>,
    lifecycle: Arc<LifecycleService>,
    namespace_store: Arc<dyn NamespaceSettingsStore>,
    weight_config: WeightEngineConfig,
}

impl BalancerFacade {
    pub fn new(
        state: Arc<ClusterState>,
        lifecycle: Arc<LifecycleService>,
        namespace_store: Arc<dyn NamespaceSettingsStore>,
        weight_config: WeightEngineConfig,
    ) -> Self {
        BalancerFacade { state, lifecycle, namespace_store, weight_config }
    }

    pub async fn build_couple(&self, opts: BuildOptions) -> Result<Couple> {
        self.lifecycle.build_couple(opts).await
    }

    pub async fn freeze_couple(&self, couple_id: &str) -> Result<()> {
        self.lifecycle.set_frozen(couple_id, true).await
    }

    pub async fn unfreeze_couple(&self, couple_id: &str) -> Result<()> {
        self.lifecycle.set_frozen(couple_id, false).await
    }

    pub async fn repair_group(&self, couple_id: &str, group_id: u32) -> Result<()> {
        self.lifecycle.repair_group(couple_id, group_id).await
    }

    pub fn group_detach_node(&self, group_id: u32, node_index: usize) -> Result<()> {
        self.lifecycle.detach_node(group_id, node_index)
    }

    pub async fn break_couple(&self, couple_id: &str, confirm: &str) -> Result<()> {
        self.lifecycle.break_couple(couple_id, confirm).await
    }

    /// `get_next_group_number`: atomically reserve `count` consecutive
    /// group ids from the persisted high-water mark.
    pub fn get_next_group_number(&self, count: u64) -> Result<std::ops::Range<u64>> {
        if count == 0 || count > 100 {
            return Err(BalancerError::BadRequest { reason: "group count must be in 1..=100".to_string() });
        }
        Ok(self.state.reserve_group_numbers(count))
    }

    /// `get_symmetric_groups`: every couple currently in the OK (`Coupled`)
    /// state.
    pub fn get_symmetric_groups(&self) -> Vec<Couple> {
        self.couples_by_status(|s| matches!(s, balancer_core::CoupleStatus::Coupled))
    }

    pub fn get_bad_groups(&self) -> Vec<Couple> {
        self.couples_by_status(|s| matches!(s, balancer_core::CoupleStatus::Bad))
    }

    pub fn get_frozen_groups(&self) -> Vec<Couple> {
        self.state.all_couple_ids().into_iter().filter_map(|id| self.state.get_couple(&id)).filter(|c| c.frozen).collect()
    }

    pub fn get_closed_groups(&self) -> Vec<Couple> {
        self.couples_by_status(|s| matches!(s, balancer_core::CoupleStatus::Broken))
    }

    /// `get_empty_groups`: uncoupled groups available for placement.
    pub fn get_empty_groups(&self) -> Vec<u32> {
        self.state.uncoupled_group_ids()
    }

    /// `get_couples_list({namespace?, state?})`: couples filtered by an
    /// optional namespace and/or status.
    pub fn get_couples_list(
        &self,
        namespace: Option<&str>,
        status: Option<balancer_core::CoupleStatus>,
    ) -> Vec<Couple> {
        self.state
            .all_couple_ids()
            .into_iter()
            .filter_map(|id| self.state.get_couple(&id))
            .filter(|c| namespace.map_or(true, |ns| c.namespace == ns))
            .filter(|c| status.map_or(true, |s| c.status == s))
            .collect()
    }

    pub fn get_group_info(&self, group_id: u32) -> Result<balancer_core::Group> {
        self.state.get_group(group_id).ok_or(BalancerError::UnknownGroup { group_id })
    }

    pub fn get_couple_info(&self, couple_id: &str) -> Result<Couple> {
        self.get_couple(couple_id)
    }

    fn couples_by_status(&self, pred: impl Fn(balancer_core::CoupleStatus) -> bool) -> Vec<Couple> {
        self.state
            .all_couple_ids()
            .into_iter()
            .filter_map(|id| self.state.get_couple(&id))
            .filter(|c| pred(c.status))
            .collect()
    }

    pub fn get_couple(&self, couple_id: &str) -> Result<Couple> {
        self.state
            .get_couple(couple_id)
            .ok_or_else(|| BalancerError::UnknownCouple { couple_id: couple_id.to_string() })
    }

    /// Aggregate every couple in `namespace` into the candidate set the
    /// weight engine scores together (it needs the whole namespace at once
    /// to find `F*`). A couple with no usable group data is simply absent
    /// rather than reported with a weight of zero.
    fn namespace_candidates(&self, namespace: &str) -> Vec<(String, Couple, CoupleAggregate)> {
        self.state
            .couples_in_namespace(namespace)
            .into_iter()
            .filter_map(|couple| {
                let aggregates: Vec<balancer_core::GroupAggregate> = couple
                    .group_ids
                    .iter()
                    .filter_map(|&id| self.state.get_group(id))
                    .filter_map(|g| g.aggregate())
                    .collect();
                let agg = CoupleAggregate::from_groups(aggregates.iter())?;
                Some((couple.id.clone(), couple, agg))
            })
            .collect()
    }

    /// Write weights for every couple in `namespace`, keyed by couple id.
    /// Used for the informational, best-effort view in
    /// [`BalancerFacade::get_namespaces_states`]; unlike
    /// [`BalancerFacade::get_group_weights`] this never fails on
    /// insufficient availability, it just reports whatever came out of the
    /// engine.
    fn namespace_weights(&self, namespace: &str) -> BTreeMap<String, (u64, WeightDiagnostic)> {
        let candidates = self.namespace_candidates(namespace);
        let pairs: Vec<(String, CoupleAggregate)> =
            candidates.into_iter().map(|(id, _, agg)| (id, agg)).collect();
        let result = compute_namespace_weights(&pairs, &self.weight_config);
        result.weights.into_iter().map(|(id, (weight, diag, _))| (id, (weight, diag))).collect()
    }

    /// `get_group_weights({namespace?})`: write weights for every couple in
    /// `namespace` (or every namespace with couples, if `None`), bucketed by
    /// couple size the way clients pick a couple matching the replica count
    /// they need. Mirrors `weight_couple_groups` combined with the
    /// admission-count check it runs before reporting: if fewer couples
    /// clear the participation filter than the namespace's `min-units`,
    /// the whole namespace is reported as
    /// [`BalancerError::InsufficientAvailability`] rather than a partial,
    /// misleadingly-thin set of weights.
    pub fn get_group_weights(
        &self,
        namespace: Option<&str>,
    ) -> Result<BTreeMap<String, BTreeMap<usize, Vec<GroupWeightEntry>>>> {
        let namespaces: Vec<String> = match namespace {
            Some(ns) => vec![ns.to_string()],
            None => self
                .state
                .all_couple_ids()
                .into_iter()
                .filter_map(|id| self.state.get_couple(&id))
                .map(|c| c.namespace)
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        let mut out = BTreeMap::new();
        for ns in namespaces {
            let candidates = self.namespace_candidates(&ns);
            if candidates.is_empty() {
                continue;
            }
            let min_units = self.state.get_namespace(&ns).map(|s| s.min_units).unwrap_or(1) as usize;

            let pairs: Vec<(String, CoupleAggregate)> =
                candidates.iter().map(|(id, _, agg)| (id.clone(), agg.clone())).collect();
            let result = compute_namespace_weights(&pairs, &self.weight_config);

            if result.positive_weight_count < min_units {
                return Err(BalancerError::InsufficientAvailability {
                    namespace: ns,
                    available: result.positive_weight_count,
                    required: min_units,
                });
            }

            let mut by_size: BTreeMap<usize, Vec<GroupWeightEntry>> = BTreeMap::new();
            for (id, couple, _) in &candidates {
                let (weight, diagnostic, free_kb) = result.weights[id];
                by_size.entry(couple.group_ids.len()).or_default().push(GroupWeightEntry {
                    group_ids: couple.group_ids.iter().copied().collect(),
                    weight,
                    diagnostic,
                    free_kb,
                });
            }
            out.insert(ns, by_size);
        }
        Ok(out)
    }

    /// Groups per datacenter, a thin read over the topology tree. Grounded
    /// on `groups_by_dc` in the original balancer; reintroduced per
    /// SPEC_FULL.md §6 as a read-only operator convenience.
    pub fn groups_by_dc(&self) -> BTreeMap<String, Vec<u32>> {
        self.state.topology().groups_by_level(0)
    }

    pub async fn get_namespace_settings(&self, namespace: &str) -> Result<NamespaceSettings> {
        if let Some(settings) = self.state.get_namespace(namespace) {
            return Ok(settings);
        }
        self.namespace_store
            .load(namespace)
            .await?
            .ok_or_else(|| BalancerError::UnknownNamespace { namespace: namespace.to_string() })
    }

    /// Apply a settings patch to a namespace, validating the merged result
    /// before persisting it. Mirrors `namespace_setup`: merge over the
    /// current settings (or the defaults for a brand-new namespace), then
    /// validate before writing anything.
    pub async fn set_namespace_settings(
        &self,
        namespace: &str,
        patch: NamespaceSettingsPatch,
        static_couple_facts: Option<StaticCoupleFacts<'_>>,
    ) -> Result<NamespaceSettings> {
        let current = self.state.get_namespace(namespace).unwrap_or_default();
        let merged = merge_namespace_settings(&current, &patch);
        validate_namespace_settings(&merged, namespace, static_couple_facts)?;

        self.namespace_store.save(namespace, &merged).await?;
        self.state.upsert_namespace(namespace, merged.clone());
        Ok(merged)
    }

    /// `get_namespaces_states`: settings, couples, and weights per
    /// namespace. Statistics are omitted -- they depend on the external
    /// stats harvester, out of scope per SPEC_FULL.md §1.
    pub fn get_namespaces_states(&self) -> BTreeMap<String, NamespaceState> {
        let mut out: BTreeMap<String, NamespaceState> = BTreeMap::new();
        for couple in self.state.all_couple_ids().into_iter().filter_map(|id| self.state.get_couple(&id)) {
            out.entry(couple.namespace.clone()).or_default().couples.push(couple);
        }
        for entry in self.state.namespace_names() {
            if let Some(settings) = self.state.get_namespace(&entry) {
                out.entry(entry).or_default().settings = Some(settings);
            }
        }
        for (namespace, state) in out.iter_mut() {
            state.weights = self.namespace_weights(namespace);
        }
        out
    }

    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        if !self.state.couples_in_namespace(namespace).is_empty() {
            return Err(BalancerError::InvalidNamespaceSetting {
                key: "namespace".to_string(),
                reason: "cannot delete a namespace that still has couples".to_string(),
            });
        }
        self.namespace_store.delete(namespace).await?;
        self.state.delete_namespace(namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StorageDaemonClient;
    use crate::lock::{DistributedLock, LocalClusterLock};
    use crate::meta_writer::MetaWriter;
    use async_trait::async_trait;
    use balancer_core::RawNodeSample;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStorage;

    #[async_trait]
    impl StorageDaemonClient for FakeStorage {
        async fn write_meta(&self, _g: u32, _b: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn remove_meta(&self, _g: u32) -> Result<()> {
            Ok(())
        }
        async fn read_meta(&self, _g: u32) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn sample_node(&self, _g: u32) -> Result<Vec<RawNodeSample>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct FakeNamespaceStore {
        saved: Mutex<HashMap<String, NamespaceSettings>>,
    }

    #[async_trait]
    impl NamespaceSettingsStore for FakeNamespaceStore {
        async fn load(&self, namespace: &str) -> Result<Option<NamespaceSettings>> {
            Ok(self.saved.lock().get(namespace).cloned())
        }
        async fn save(&self, namespace: &str, settings: &NamespaceSettings) -> Result<()> {
            self.saved.lock().insert(namespace.to_string(), settings.clone());
            Ok(())
        }
        async fn delete(&self, namespace: &str) -> Result<()> {
            self.saved.lock().remove(namespace);
            Ok(())
        }
    }

    fn make_facade() -> BalancerFacade {
        let state = Arc::new(ClusterState::new());
        let lock: Arc<dyn DistributedLock> = Arc::new(LocalClusterLock::new());
        let writer = Arc::new(MetaWriter::new(Arc::new(FakeStorage)));
        let lifecycle = Arc::new(LifecycleService::new(state.clone(), lock, writer, 0.05));
        let namespace_store = Arc::new(FakeNamespaceStore::default());
        BalancerFacade::new(state, lifecycle, namespace_store, WeightEngineConfig::default())
    }

    #[tokio::test]
    async fn set_namespace_settings_rejects_invalid_merge() {
        let facade = make_facade();
        let patch = NamespaceSettingsPatch { groups_count: Some(0), ..Default::default() };
        let result = facade.set_namespace_settings("ns", patch, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_namespace_settings_persists_valid_merge() {
        let facade = make_facade();
        let patch = NamespaceSettingsPatch { groups_count: Some(2), ..Default::default() };
        let settings = facade.set_namespace_settings("ns", patch, None).await.unwrap();
        assert_eq!(settings.groups_count, 2);
        assert_eq!(facade.get_namespace_settings("ns").await.unwrap().groups_count, 2);
    }

    #[test]
    fn get_next_group_number_reserves_disjoint_ranges() {
        let facade = make_facade();
        let first = facade.get_next_group_number(5).unwrap();
        let second = facade.get_next_group_number(5).unwrap();
        assert_eq!(first, 1..6);
        assert_eq!(second, 6..11);
    }

    #[test]
    fn get_next_group_number_rejects_out_of_range_count() {
        let facade = make_facade();
        assert!(facade.get_next_group_number(0).is_err());
        assert!(facade.get_next_group_number(101).is_err());
    }

    #[test]
    fn get_couples_list_filters_by_namespace_and_status() {
        let facade = make_facade();
        facade.state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "a".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        facade.state.upsert_couple(Couple {
            id: "3:4".to_string(),
            namespace: "b".to_string(),
            group_ids: std::collections::BTreeSet::from([3, 4]),
            status: balancer_core::CoupleStatus::Bad,
            frozen: false,
        });
        assert_eq!(facade.get_couples_list(Some("a"), None).len(), 1);
        assert_eq!(facade.get_symmetric_groups().len(), 1);
        assert_eq!(facade.get_bad_groups().len(), 1);
        assert_eq!(facade.get_couples_list(None, Some(balancer_core::CoupleStatus::Bad)).len(), 1);
    }

    #[tokio::test]
    async fn get_namespaces_states_groups_couples_and_settings() {
        let facade = make_facade();
        facade.set_namespace_settings("ns", NamespaceSettingsPatch { groups_count: Some(2), ..Default::default() }, None).await.unwrap();
        facade.state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "ns".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        let states = facade.get_namespaces_states();
        let ns = states.get("ns").unwrap();
        assert!(ns.settings.is_some());
        assert_eq!(ns.couples.len(), 1);
    }

    #[tokio::test]
    async fn delete_namespace_blocked_while_couples_exist() {
        let facade = make_facade();
        facade.state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "ns".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        let result = facade.delete_namespace("ns").await;
        assert!(result.is_err());
    }

    fn sample_with_free_space(blocks_available: u64, blocks_total: u64, ts: u64) -> RawNodeSample {
        RawNodeSample {
            blocks_available,
            block_size: 1024,
            blocks_total,
            bytes_written: 0,
            bytes_read: 0,
            du1: Some(100),
            la1: None,
            timestamp_secs: ts,
        }
    }

    fn ample_group(id: u32) -> balancer_core::Group {
        let mut node = balancer_core::NodeState::default();
        node.observe(sample_with_free_space(900_000, 1_000_000, 100));
        node.observe(sample_with_free_space(900_000, 1_000_000, 200));
        balancer_core::Group { id, status: balancer_core::GroupStatus::Coupled, nodes: vec![node], total_space_kb: 1_000_000.0 }
    }

    #[test]
    fn get_group_weights_buckets_by_couple_size() {
        let facade = make_facade();
        facade.state.upsert_group(ample_group(1));
        facade.state.upsert_group(ample_group(2));
        facade.state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "ns".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        let result = facade.get_group_weights(Some("ns")).unwrap();
        let by_size = &result["ns"];
        let entries = &by_size[&2];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].group_ids, vec![1, 2]);
        assert!(entries[0].weight >= WeightEngineConfig::default().minimum_weight);
    }

    #[tokio::test]
    async fn get_group_weights_reports_insufficient_availability() {
        let facade = make_facade();
        facade
            .set_namespace_settings("ns", NamespaceSettingsPatch { groups_count: Some(2), min_units: Some(2), ..Default::default() }, None)
            .await
            .unwrap();
        facade.state.upsert_group(ample_group(1));
        facade.state.upsert_group(ample_group(2));
        facade.state.upsert_couple(Couple {
            id: "1:2".to_string(),
            namespace: "ns".to_string(),
            group_ids: std::collections::BTreeSet::from([1, 2]),
            status: balancer_core::CoupleStatus::Coupled,
            frozen: false,
        });
        let result = facade.get_group_weights(Some("ns"));
        assert!(matches!(result, Err(BalancerError::InsufficientAvailability { .. })));
    }
}
