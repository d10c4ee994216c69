//! Couple-id canonical encoding.
//!
//! Grounded on `couple_str`/`Couple.compose_group_meta` in
//! `examples/original_source/src/cocaine-app/balancer.py`: a couple's
//! external id is its member group ids, sorted ascending, joined by `:`.

use std::collections::BTreeSet;

/// Build the canonical couple id for a set of group ids.
pub fn couple_id(group_ids: &BTreeSet<u32>) -> String {
    group_ids.iter().map(u32::to_string).collect::<Vec<_>>().join(":")
}

/// Parse a canonical couple id back into its member group ids. Rejects
/// malformed ids (non-numeric segments, duplicate group ids, fewer than
/// one member) rather than silently truncating.
pub fn parse_couple_id(id: &str) -> Option<BTreeSet<u32>> {
    if id.is_empty() {
        return None;
    }
    let mut ids = BTreeSet::new();
    for part in id.split(':') {
        let group: u32 = part.parse().ok()?;
        if !ids.insert(group) {
            return None;
        }
    }
    Some(ids)
}
