//! Weight engine: converts a namespace's couples' current load into
//! client-facing write weights.
//!
//! Grounded on `setConfig`/`weight_couple_groups` in
//! `examples/original_source/src/cocaine-app/balancelogicadapter.py`. Default
//! constants below are copied verbatim from `setConfig`. The head/tail split
//! needs `F*`, the maximum free-space-relative reading among a namespace's
//! participating couples, so the engine operates over the whole candidate
//! set at once rather than couple-by-couple (the original numeric formula
//! lives in a `rawBalance` call not present in the retained source file set;
//! the admission filter and the multipliers below are exact, the raw score
//! a direct reading of the documented
//! `max_put_rate + additional_rps_number + additional_rps_percentage*real_put_rate`
//! formula).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::group::CoupleAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEngineConfig {
    pub min_free_space_kb_to_participate: f64,
    pub min_free_space_relative_to_participate: f64,
    pub min_units_with_positive_weight: u32,
    pub additional_units_number: u32,
    pub additional_units_percentage: f64,
    pub additional_message_per_second_number: f64,
    pub additional_message_per_second_percentage: f64,
    pub tail_height_percentage: f64,
    pub tail_height_space_kb: f64,
    pub weight_multiplier_head: f64,
    pub weight_multiplier_tail: f64,
    pub minimum_weight: u64,
}

impl Default for WeightEngineConfig {
    fn default() -> Self {
        WeightEngineConfig {
            min_free_space_kb_to_participate: 256.0 * 1024.0,
            min_free_space_relative_to_participate: 0.15,
            min_units_with_positive_weight: 1,
            additional_units_number: 1,
            additional_units_percentage: 0.10,
            additional_message_per_second_number: 20.0,
            additional_message_per_second_percentage: 0.15,
            tail_height_percentage: 0.95,
            tail_height_space_kb: 500.0 * 1024.0,
            weight_multiplier_head: 1_000_000.0,
            weight_multiplier_tail: 600_000.0,
            minimum_weight: 10_000,
        }
    }
}

/// Whether a couple is classified into the "head" (plenty of free space,
/// close to the namespace's most spacious participating couple) or "tail"
/// (meaningfully behind it) regime. The tail regime uses a smaller
/// multiplier so that nearly-full couples receive a disproportionately
/// smaller share of new writes as they approach capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadRegime {
    Head,
    Tail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightDiagnostic {
    pub regime: LoadRegime,
    pub raw_score: f64,
    pub participating: bool,
}

fn is_participating(agg: &CoupleAggregate, config: &WeightEngineConfig) -> bool {
    agg.free_space_kb >= config.min_free_space_kb_to_participate
        && agg.free_space_relative >= config.min_free_space_relative_to_participate
        && agg.max_put_per_period.is_finite()
}

/// Result of [`compute_namespace_weights`]: per-couple `(weight,
/// diagnostic, free_kb snapshot)`, plus the engine's own bookkeeping for the
/// admission-count step. `positive_weight_count` is what a caller checks
/// against a namespace's `min-units` to decide whether to report
/// [`crate::BalancerError::InsufficientAvailability`]; `target_admission_count`
/// is the engine's internal target (step 3), exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct NamespaceWeightResult {
    pub weights: BTreeMap<String, (u64, WeightDiagnostic, f64)>,
    pub target_admission_count: u32,
    pub positive_weight_count: usize,
}

/// Compute write weights for every couple in a namespace at once. Couples
/// that fail the participation filter get weight `0` and a `false`
/// diagnostic; every participating couple gets a weight floored at
/// `minimum_weight`, so it never reports a positive weight for a couple that
/// didn't pass the filter and never reports zero for one that did.
pub fn compute_namespace_weights(
    candidates: &[(String, CoupleAggregate)],
    config: &WeightEngineConfig,
) -> NamespaceWeightResult {
    let participating_count = candidates.iter().filter(|(_, a)| is_participating(a, config)).count();

    let f_star = candidates
        .iter()
        .filter(|(_, a)| is_participating(a, config))
        .map(|(_, a)| a.free_space_relative)
        .fold(0.0f64, f64::max);

    let target_admission_count = ((participating_count as f64 * config.additional_units_percentage).ceil() as u32
        + config.additional_units_number)
        .max(config.min_units_with_positive_weight);

    let mut weights = BTreeMap::new();
    let mut positive_weight_count = 0usize;

    for (id, agg) in candidates {
        if !is_participating(agg, config) {
            weights.insert(
                id.clone(),
                (0, WeightDiagnostic { regime: LoadRegime::Tail, raw_score: 0.0, participating: false }, agg.free_space_kb),
            );
            continue;
        }

        let regime = if agg.free_space_relative >= config.tail_height_percentage * f_star
            && agg.free_space_kb >= config.tail_height_space_kb
        {
            LoadRegime::Head
        } else {
            LoadRegime::Tail
        };
        let multiplier = match regime {
            LoadRegime::Head => config.weight_multiplier_head,
            LoadRegime::Tail => config.weight_multiplier_tail,
        };

        let raw_score = multiplier
            * (agg.max_put_per_period
                + config.additional_message_per_second_number
                + config.additional_message_per_second_percentage * agg.max_real_put_per_period);
        let weight = (raw_score.round() as u64).max(config.minimum_weight);
        positive_weight_count += 1;

        weights.insert(id.clone(), (weight, WeightDiagnostic { regime, raw_score, participating: true }, agg.free_space_kb));
    }

    NamespaceWeightResult { weights, target_admission_count, positive_weight_count }
}
