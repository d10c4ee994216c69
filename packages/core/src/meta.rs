//! Couple meta blob: the small record written to every member group that
//! records the couple's namespace and lifecycle state.
//!
//! Grounded on `Couple.compose_group_meta`/`parse_meta` in
//! `examples/original_source/src/cocaine-app/balancer.py`; encoded with
//! `rmp-serde` (MessagePack), matching the original's `msgpack.packb` and
//! the teacher's own wire format for `ClusterMessage`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The data written into every member group's meta slot. Identical across
/// all members of a couple; divergence between members is the "corrupt or
/// inconsistent meta" error case named in the error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupleMeta {
    pub namespace: String,
    pub couple_group_ids: BTreeSet<u32>,
    pub frozen: bool,
    /// Monotonically increasing per couple; bumped on every meta write so
    /// readers can detect a torn/partial update.
    pub version: u64,
}

impl CoupleMeta {
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| crate::error::BalancerError::Internal(format!("failed to encode couple meta: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
