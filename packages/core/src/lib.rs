//! Balancer core -- the pure domain model for a replicated object store's
//! control plane: node/group/couple aggregation, the weight engine, the
//! fault-domain topology tree, the placement planner, namespace settings
//! validation, couple-id encoding, and the couple meta blob.
//!
//! Nothing in this crate performs I/O or holds a lock; it is the set of
//! deterministic functions the server crate calls under its own
//! concurrency control.

pub mod error;
pub mod group;
pub mod ids;
pub mod meta;
pub mod namespace;
pub mod node;
pub mod placement;
pub mod topology;
pub mod weight;

pub use error::{BalancerError, Result};
pub use group::{Couple, CoupleAggregate, CoupleStatus, Group, GroupAggregate, GroupStatus};
pub use ids::{couple_id, parse_couple_id};
pub use meta::CoupleMeta;
pub use namespace::{
    merge as merge_namespace_settings, validate as validate_namespace_settings, AuthKeys,
    NamespaceSettings, NamespaceSettingsPatch, RedirectSettings, SignatureSettings,
    StaticCoupleFacts, SuccessCopiesPolicy,
};
pub use node::{NodeState, RawNodeSample};
pub use placement::{choose_groups, choose_groups_to_couple};
pub use topology::{bucket_by_total_space, Coordinates, GroupTopology, NodeLocation, TopologySchema};
pub use weight::{compute_namespace_weights, LoadRegime, NamespaceWeightResult, WeightDiagnostic, WeightEngineConfig};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
