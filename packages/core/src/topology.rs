//! Fault-domain topology tree.
//!
//! Grounded on `NODE_TYPES`, `__build_cluster_state`, and `groups_units` in
//! `examples/original_source/src/cocaine-app/balancer.py`: the topology is a
//! list of configurable levels (e.g. `dc`, `host`) with an implicit `root`
//! at the top and a synthesized `hdd` leaf at the bottom, keyed by the
//! host's filesystem path plus its filesystem id so that two drives on the
//! same host are never treated as fault-domain-equivalent.

use std::collections::BTreeMap;

/// One coordinate of a group's placement, one entry per topology level,
/// ordered from `root` (implicit, not stored) down to `hdd`.
pub type Coordinates = Vec<String>;

/// A single physical node backend's location, as reported by discovery.
#[derive(Debug, Clone)]
pub struct NodeLocation {
    pub group_id: u32,
    /// One value per configured level, e.g. `["dc1", "host-42"]`.
    pub levels: Vec<String>,
    pub host_full_path: String,
    pub filesystem_id: String,
}

/// The ordered list of fault-domain levels below the implicit root and
/// above the synthesized `hdd` leaf, e.g. `["dc", "host"]`.
#[derive(Debug, Clone)]
pub struct TopologySchema {
    pub levels: Vec<String>,
}

impl Default for TopologySchema {
    fn default() -> Self {
        TopologySchema { levels: vec!["dc".to_string(), "host".to_string()] }
    }
}

impl TopologySchema {
    /// Full coordinate list including the synthesized `hdd` leaf.
    pub fn full_levels(&self) -> Vec<String> {
        let mut v = self.levels.clone();
        v.push("hdd".to_string());
        v
    }
}

/// Per-group coordinates across every node backend the group occupies. A
/// group spanning more than one host backend (unusual, but not forbidden at
/// this layer) carries one coordinate tuple per backend.
#[derive(Debug, Clone, Default)]
pub struct GroupTopology {
    by_group: BTreeMap<u32, Vec<Coordinates>>,
}

impl GroupTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: &TopologySchema, loc: &NodeLocation) {
        let _ = schema;
        let mut coords = loc.levels.clone();
        coords.push(format!("{}|{}", loc.host_full_path, loc.filesystem_id));
        self.by_group.entry(loc.group_id).or_default().push(coords);
    }

    pub fn coordinates_for(&self, group_id: u32) -> &[Coordinates] {
        self.by_group.get(&group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when `a` and `b` share a coordinate at `level_index` (0 = the
    /// first configured level, typically `dc`). Used by the placement
    /// planner to reject combinations that co-locate replicas in a
    /// forbidden fault domain.
    pub fn shares_domain_at(&self, a: u32, b: u32, level_index: usize) -> bool {
        let a_vals: Vec<&str> = self
            .coordinates_for(a)
            .iter()
            .filter_map(|c| c.get(level_index).map(String::as_str))
            .collect();
        let b_vals: Vec<&str> = self
            .coordinates_for(b)
            .iter()
            .filter_map(|c| c.get(level_index).map(String::as_str))
            .collect();
        a_vals.iter().any(|v| b_vals.contains(v))
    }

    /// Number of configured levels this topology carries coordinates for
    /// (e.g. `dc`, `host`, plus the synthesized `hdd` leaf), derived from
    /// whatever coordinate tuple happens to be on hand rather than stored
    /// separately, since every tuple inserted through [`GroupTopology::insert`]
    /// has the same length.
    pub fn level_count(&self) -> usize {
        self.by_group.values().find_map(|coords| coords.first()).map(Vec::len).unwrap_or(0)
    }

    /// Groups bucketed by their value at the given level (e.g. datacenter),
    /// mirroring `groups_by_dc` in the original balancer.
    pub fn groups_by_level(&self, level_index: usize) -> BTreeMap<String, Vec<u32>> {
        let mut out: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for (&group_id, coords_list) in &self.by_group {
            for coords in coords_list {
                if let Some(value) = coords.get(level_index) {
                    out.entry(value.clone()).or_default().push(group_id);
                }
            }
        }
        for ids in out.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        out
    }
}

/// Bucket groups by total space, merging any two groups whose total space
/// differs by no more than `tolerance` (a fraction of the larger one) into
/// the same bucket. Grounded on `__do_groups_by_total_space` in the
/// original, which avoids mixing groups of meaningfully different size into
/// one couple.
pub fn bucket_by_total_space(
    groups_total_space_kb: &BTreeMap<u32, f64>,
    tolerance: f64,
) -> Vec<Vec<u32>> {
    let mut sorted: Vec<(u32, f64)> =
        groups_total_space_kb.iter().map(|(&id, &space)| (id, space)).collect();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));

    let mut buckets: Vec<Vec<u32>> = Vec::new();
    let mut bucket_anchor: Option<f64> = None;
    let mut current: Vec<u32> = Vec::new();

    for (id, space) in sorted {
        match bucket_anchor {
            Some(anchor) if (space - anchor).abs() <= anchor * tolerance => {
                current.push(id);
            }
            _ => {
                if !current.is_empty() {
                    buckets.push(std::mem::take(&mut current));
                }
                current.push(id);
                bucket_anchor = Some(space);
            }
        }
    }
    if !current.is_empty() {
        buckets.push(current);
    }
    buckets
}
