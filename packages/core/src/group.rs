//! Group and couple aggregates.
//!
//! Grounded on `GroupState`/`SymmGroup` in
//! `examples/original_source/src/cocaine-app/balancelogicadapter.py`: a group
//! aggregates its member nodes by summing rates and taking the minimum free
//! space; a couple aggregates its member groups with a different rule set
//! (the couple's write ceiling is bounded by its slowest group).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::node::NodeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    /// Freshly created, not yet coupled.
    Init,
    /// Coupled and serving traffic normally.
    Coupled,
    /// A member node backend is unhealthy; excluded from placement.
    Bad,
    /// Administratively removed from service.
    Broken,
}

/// A single storage group: a set of node backends that hold the same
/// replica of data.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: u32,
    pub status: GroupStatus,
    pub nodes: Vec<NodeState>,
    /// Total (not free) space across the group's node backends, in
    /// kibibytes. Used to bucket groups before placement so a couple is
    /// never built from mismatched-size groups.
    pub total_space_kb: f64,
}

/// Sum/min aggregate over a group's member nodes, mirroring
/// `GroupState.update` in the original: all four rates (`real`/`max` ×
/// `put`/`get`) and `free_kb` sum across nodes; `free_rel` takes the
/// minimum, since one starved backend caps the whole group.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupAggregate {
    pub real_put_per_period: f64,
    pub real_get_per_period: f64,
    pub max_put_per_period: f64,
    pub max_get_per_period: f64,
    pub free_space_relative: f64,
    pub free_space_kb: f64,
}

impl Group {
    /// All member nodes that have reported at least one sample and are not
    /// excluded. `None` (rather than a zeroed aggregate) when the group has
    /// no usable nodes, so callers don't mistake "no data" for "empty load".
    pub fn aggregate(&self) -> Option<GroupAggregate> {
        let mut iter = self.nodes.iter().filter(|n| n.has_sample());
        let first = iter.next()?;
        let mut agg = GroupAggregate {
            real_put_per_period: first.real_put_per_period,
            real_get_per_period: first.real_get_per_period,
            max_put_per_period: first.max_put_per_period,
            max_get_per_period: first.max_get_per_period,
            free_space_relative: first.free_space_relative,
            free_space_kb: first.free_space_kb,
        };
        for n in iter {
            agg.real_put_per_period += n.real_put_per_period;
            agg.real_get_per_period += n.real_get_per_period;
            agg.max_put_per_period += n.max_put_per_period;
            agg.max_get_per_period += n.max_get_per_period;
            agg.free_space_relative = agg.free_space_relative.min(n.free_space_relative);
            agg.free_space_kb += n.free_space_kb;
        }
        Some(agg)
    }

    pub fn is_available_for_placement(&self) -> bool {
        matches!(self.status, GroupStatus::Init)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoupleStatus {
    Init,
    Coupled,
    Bad,
    Frozen,
    Broken,
}

impl CoupleStatus {
    /// Derive a couple's status as a pure function of its member groups'
    /// statuses, its own `frozen` flag, and whether their persisted meta
    /// agrees. Mirrors `update_status`'s good/bad/frozen/broken
    /// classification in the original: a `Broken` or unhealthy/uninitialized
    /// member, or disagreeing meta, always overrides `frozen` -- an
    /// administrative freeze never masks a couple that's actually damaged.
    pub fn derive(member_statuses: &[GroupStatus], frozen: bool, meta_agrees: bool) -> CoupleStatus {
        if member_statuses.iter().any(|s| matches!(s, GroupStatus::Broken)) {
            return CoupleStatus::Broken;
        }
        if !meta_agrees || member_statuses.iter().any(|s| matches!(s, GroupStatus::Bad | GroupStatus::Init)) {
            return CoupleStatus::Bad;
        }
        if frozen {
            return CoupleStatus::Frozen;
        }
        CoupleStatus::Coupled
    }
}

/// A couple: `N` groups holding the replicas of one logical namespace shard.
#[derive(Debug, Clone)]
pub struct Couple {
    pub id: String,
    pub namespace: String,
    pub group_ids: BTreeSet<u32>,
    pub status: CoupleStatus,
    pub frozen: bool,
}

/// Aggregate over a couple's member groups, mirroring `SymmGroup.update` in
/// the original: the couple can write no faster than its slowest group
/// (`min` over `max_put_per_period`), but reads scale with the sum of its
/// members' observed read rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoupleAggregate {
    pub max_real_put_per_period: f64,
    pub max_put_per_period: f64,
    pub total_real_get_per_period: f64,
    pub max_get_per_period: f64,
    pub free_space_relative: f64,
    pub free_space_kb: f64,
}

impl CoupleAggregate {
    pub fn from_groups<'a>(groups: impl Iterator<Item = &'a GroupAggregate>) -> Option<Self> {
        let mut iter = groups.peekable();
        iter.peek()?;
        let mut agg = CoupleAggregate {
            max_real_put_per_period: 0.0,
            max_put_per_period: f64::INFINITY,
            total_real_get_per_period: 0.0,
            max_get_per_period: 0.0,
            free_space_relative: f64::INFINITY,
            free_space_kb: f64::INFINITY,
        };
        for g in iter {
            agg.max_real_put_per_period = agg.max_real_put_per_period.max(g.real_put_per_period);
            agg.max_put_per_period = agg.max_put_per_period.min(g.max_put_per_period);
            agg.total_real_get_per_period += g.real_get_per_period;
            agg.max_get_per_period += g.max_get_per_period;
            agg.free_space_relative = agg.free_space_relative.min(g.free_space_relative);
            agg.free_space_kb = agg.free_space_kb.min(g.free_space_kb);
        }
        Some(agg)
    }
}
