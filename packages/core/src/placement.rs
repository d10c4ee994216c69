//! Placement planner: picks which uncoupled groups become a new couple.
//!
//! Grounded on `choose_groups`, `choose_groups_to_couple`, and
//! `__weight_combination` in
//! `examples/original_source/src/cocaine-app/balancer.py`: candidate groups
//! are bucketed by total space (see [`crate::topology::bucket_by_total_space`]),
//! then the combination of groups with the lowest fault-domain imbalance is
//! chosen, with combinations that co-locate two replicas in a forbidden
//! domain excluded outright. Imbalance is scored hierarchically, top-down
//! across every topology level (datacenter before host before drive):
//! scores form a vector, one entry per level, compared lexicographically,
//! so a combination that balances the coarsest level always beats one that
//! only balances a finer one. Each level's count also folds in the groups
//! already placed by other couples in the same namespace, so a second
//! couple balances against the first couple's placement rather than
//! scoring itself in isolation.

use crate::topology::GroupTopology;

/// Score a candidate combination by how unevenly its members (plus
/// `already_placed`, groups from other couples in the same namespace) are
/// spread across the domain values at `level_index`, measured against every
/// domain value known to the topology at that level (not just the ones the
/// selection happens to touch) so that colocating two replicas in one
/// domain scores strictly worse than spreading them across two. Lower is
/// better; `0.0` means perfectly even.
fn imbalance_score(combo: &[u32], already_placed: &[u32], topo: &GroupTopology, level_index: usize) -> f64 {
    use std::collections::BTreeMap;
    let mut counts: BTreeMap<String, u32> =
        topo.groups_by_level(level_index).into_keys().map(|v| (v, 0u32)).collect();
    if counts.is_empty() {
        return 0.0;
    }
    let mut total = 0u32;
    for &g in already_placed.iter().chain(combo.iter()) {
        for coords in topo.coordinates_for(g) {
            if let Some(v) = coords.get(level_index) {
                if let Some(c) = counts.get_mut(v) {
                    *c += 1;
                    total += 1;
                }
            }
        }
    }
    let avg = total as f64 / counts.len() as f64;
    counts.values().map(|&c| (c as f64 - avg).powi(2)).sum()
}

/// Score a combination across every level from `0` (the coarsest,
/// typically datacenter) to `level_count - 1` (the finest, the synthesized
/// drive leaf), most-significant level first.
fn hierarchical_score(combo: &[u32], already_placed: &[u32], topo: &GroupTopology, level_count: usize) -> Vec<f64> {
    (0..level_count).map(|level| imbalance_score(combo, already_placed, topo, level)).collect()
}

fn violates_forbidden_sharing(combo: &[u32], topo: &GroupTopology, level_index: usize) -> bool {
    for i in 0..combo.len() {
        for j in (i + 1)..combo.len() {
            if topo.shares_domain_at(combo[i], combo[j], level_index) {
                return true;
            }
        }
    }
    false
}

/// Generate all k-combinations of `items`, each combination sorted
/// ascending; order of combinations is deterministic (lexicographic over
/// the sorted input).
fn combinations(items: &[u32], k: usize) -> Vec<Vec<u32>> {
    if k == 0 || k > items.len() {
        return Vec::new();
    }
    let mut sorted = items.to_vec();
    sorted.sort_unstable();
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(k);
    combinations_rec(&sorted, k, 0, &mut current, &mut out);
    out
}

fn combinations_rec(items: &[u32], k: usize, start: usize, current: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if current.len() == k {
        out.push(current.clone());
        return;
    }
    for i in start..items.len() {
        current.push(items[i]);
        combinations_rec(items, k, i + 1, current, out);
        current.pop();
    }
}

/// Pick `replicas` groups out of `candidates` minimizing fault-domain
/// imbalance across all `level_count` topology levels, top-down. When
/// `forbid_sharing` is set, any combination that places two selected groups
/// in the same domain value (at any level) is rejected outright rather than
/// merely penalized. `already_placed` are groups already belonging to other
/// couples in the same namespace; they count toward the per-domain tallies
/// so a later couple balances against earlier ones. Ties are broken by the
/// lexicographically-smallest combination of group ids, for reproducibility.
pub fn choose_groups(
    candidates: &[u32],
    replicas: usize,
    topo: &GroupTopology,
    level_count: usize,
    forbid_sharing: bool,
    already_placed: &[u32],
) -> Option<Vec<u32>> {
    let mut best: Option<(Vec<f64>, Vec<u32>)> = None;
    for combo in combinations(candidates, replicas) {
        if forbid_sharing && (0..level_count).any(|level| violates_forbidden_sharing(&combo, topo, level)) {
            continue;
        }
        let score = hierarchical_score(&combo, already_placed, topo, level_count);
        let is_better = match &best {
            None => true,
            Some((best_score, best_combo)) => {
                score < *best_score || (score == *best_score && combo < *best_combo)
            }
        };
        if is_better {
            best = Some((score, combo));
        }
    }
    best.map(|(_, combo)| combo)
}

/// Plan a couple across pre-bucketed candidate sets (see
/// [`crate::topology::bucket_by_total_space`]): try each bucket in turn,
/// skipping any bucket that lacks the mandatory groups or has too few
/// candidates, and return the first feasible placement. Mirrors
/// `choose_groups_to_couple` iterating buckets in the original.
pub fn choose_groups_to_couple(
    buckets: &[Vec<u32>],
    replicas: usize,
    topo: &GroupTopology,
    level_count: usize,
    forbid_sharing: bool,
    mandatory_groups: &[u32],
    already_placed: &[u32],
) -> Option<Vec<u32>> {
    for bucket in buckets {
        if bucket.len() < replicas {
            continue;
        }
        if !mandatory_groups.iter().all(|m| bucket.contains(m)) {
            continue;
        }
        if let Some(combo) = choose_groups(bucket, replicas, topo, level_count, forbid_sharing, already_placed) {
            if mandatory_groups.iter().all(|m| combo.contains(m)) {
                return Some(combo);
            }
        }
    }
    None
}
