//! Namespace settings: validated configuration attached to a namespace.
//!
//! Grounded on `validate_ns_settings`, `ALLOWED_NS_*_KEYS`, and
//! `__merge_dict` in `examples/original_source/src/cocaine-app/balancer.py`.
//! The original represents settings as a nested dict with an allow-list of
//! keys; here the allow-list is enforced structurally by an enumerated
//! struct instead, per the Design Note in SPEC_FULL.md §4.G.

use serde::{Deserialize, Serialize};

use crate::error::{BalancerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuccessCopiesPolicy {
    Any,
    Quorum,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthKeys {
    pub read: Option<String>,
    pub write: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureSettings {
    pub token: Option<String>,
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedirectSettings {
    pub content_length_threshold: Option<i64>,
    pub expire_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    pub groups_count: u32,
    pub min_units: u32,
    pub reserved_space_percentage: f64,
    pub success_copies_num: SuccessCopiesPolicy,
    pub auth_keys: AuthKeys,
    pub signature: SignatureSettings,
    pub redirect: RedirectSettings,
    pub static_couple: Option<String>,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        NamespaceSettings {
            groups_count: 0,
            min_units: 1,
            reserved_space_percentage: 0.0,
            success_copies_num: SuccessCopiesPolicy::Quorum,
            auth_keys: AuthKeys::default(),
            signature: SignatureSettings::default(),
            redirect: RedirectSettings::default(),
            static_couple: None,
        }
    }
}

/// A partial update to namespace settings. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceSettingsPatch {
    pub groups_count: Option<u32>,
    pub min_units: Option<u32>,
    pub reserved_space_percentage: Option<f64>,
    pub success_copies_num: Option<SuccessCopiesPolicy>,
    pub auth_keys: Option<AuthKeys>,
    pub signature: Option<SignatureSettings>,
    pub redirect: Option<RedirectSettings>,
    pub static_couple: Option<String>,
}

/// Deep-merge a patch onto existing settings. Scalars overwrite; nested
/// blocks (`auth_keys`, `signature`, `redirect`) merge field-by-field per
/// `__merge_dict`'s recursive-dict behavior -- a patch supplying only
/// `signature.token` leaves an existing `signature.path_prefix` in place
/// rather than wiping the whole block.
pub fn merge(base: &NamespaceSettings, patch: &NamespaceSettingsPatch) -> NamespaceSettings {
    NamespaceSettings {
        groups_count: patch.groups_count.unwrap_or(base.groups_count),
        min_units: patch.min_units.unwrap_or(base.min_units),
        reserved_space_percentage: patch
            .reserved_space_percentage
            .unwrap_or(base.reserved_space_percentage),
        success_copies_num: patch.success_copies_num.unwrap_or(base.success_copies_num),
        auth_keys: merge_auth_keys(&base.auth_keys, patch.auth_keys.as_ref()),
        signature: merge_signature(&base.signature, patch.signature.as_ref()),
        redirect: merge_redirect(&base.redirect, patch.redirect.as_ref()),
        static_couple: patch.static_couple.clone().or_else(|| base.static_couple.clone()),
    }
}

fn merge_auth_keys(base: &AuthKeys, patch: Option<&AuthKeys>) -> AuthKeys {
    match patch {
        None => base.clone(),
        Some(patch) => AuthKeys {
            read: patch.read.clone().or_else(|| base.read.clone()),
            write: patch.write.clone().or_else(|| base.write.clone()),
        },
    }
}

fn merge_signature(base: &SignatureSettings, patch: Option<&SignatureSettings>) -> SignatureSettings {
    match patch {
        None => base.clone(),
        Some(patch) => SignatureSettings {
            token: patch.token.clone().or_else(|| base.token.clone()),
            path_prefix: patch.path_prefix.clone().or_else(|| base.path_prefix.clone()),
        },
    }
}

fn merge_redirect(base: &RedirectSettings, patch: Option<&RedirectSettings>) -> RedirectSettings {
    match patch {
        None => base.clone(),
        Some(patch) => RedirectSettings {
            content_length_threshold: patch.content_length_threshold.or(base.content_length_threshold),
            expire_time: patch.expire_time.or(base.expire_time),
        },
    }
}

/// Already-resolved facts about the couple named by `static_couple`,
/// supplied by the caller (the validator stays pure and does no registry
/// I/O itself).
pub struct StaticCoupleFacts<'a> {
    pub exists: bool,
    pub namespace: &'a str,
    pub group_count: usize,
}

/// Validate namespace settings. Mirrors the checks in `validate_ns_settings`:
/// groups-count must be positive unless a static couple pins the namespace
/// to one couple, min-units must be positive, reserved-space-percentage
/// must be a fraction, redirect fields have the documented bounds, and the
/// `(redirect.expire_time, signature.token, signature.path_prefix)` trio is
/// all-or-nothing.
pub fn validate(
    settings: &NamespaceSettings,
    namespace: &str,
    static_couple_facts: Option<StaticCoupleFacts<'_>>,
) -> Result<()> {
    if settings.static_couple.is_none() && settings.groups_count == 0 {
        return Err(BalancerError::InvalidNamespaceSetting {
            key: "groups-count".to_string(),
            reason: "must be positive unless static-couple is set".to_string(),
        });
    }

    if settings.min_units == 0 {
        return Err(BalancerError::InvalidNamespaceSetting {
            key: "min-units".to_string(),
            reason: "must be a positive integer".to_string(),
        });
    }

    if !(0.0..=1.0).contains(&settings.reserved_space_percentage) {
        return Err(BalancerError::InvalidNamespaceSetting {
            key: "reserved-space-percentage".to_string(),
            reason: "must be in [0, 1]".to_string(),
        });
    }

    if let Some(threshold) = settings.redirect.content_length_threshold {
        if threshold < -1 {
            return Err(BalancerError::InvalidNamespaceSetting {
                key: "redirect.content-length-threshold".to_string(),
                reason: "must be >= -1".to_string(),
            });
        }
    }

    if let Some(expire) = settings.redirect.expire_time {
        if expire <= 0 {
            return Err(BalancerError::InvalidNamespaceSetting {
                key: "redirect.expire-time".to_string(),
                reason: "must be positive".to_string(),
            });
        }
    }

    let trio = [
        settings.redirect.expire_time.is_some(),
        settings.signature.token.is_some(),
        settings.signature.path_prefix.is_some(),
    ];
    if trio.iter().any(|&p| p) && !trio.iter().all(|&p| p) {
        return Err(BalancerError::InvalidNamespaceSetting {
            key: "signature".to_string(),
            reason: "redirect.expire-time, signature.token and signature.path-prefix must all be set together or not at all".to_string(),
        });
    }

    if let Some(couple_id) = &settings.static_couple {
        let facts = static_couple_facts.ok_or_else(|| BalancerError::InvalidStaticCouple {
            reason: "no couple facts supplied for validation".to_string(),
        })?;
        if !facts.exists {
            return Err(BalancerError::InvalidStaticCouple {
                reason: format!("couple {couple_id} does not exist"),
            });
        }
        if facts.namespace != namespace {
            return Err(BalancerError::InvalidStaticCouple {
                reason: format!("couple {couple_id} belongs to namespace {:?}, not {namespace:?}", facts.namespace),
            });
        }
        if settings.groups_count != 0 && facts.group_count != settings.groups_count as usize {
            return Err(BalancerError::InvalidStaticCouple {
                reason: format!(
                    "couple {couple_id} has {} groups, namespace requires {}",
                    facts.group_count, settings.groups_count
                ),
            });
        }
    }

    Ok(())
}
