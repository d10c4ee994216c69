//! Process-wide configuration.
//!
//! Grounded on `ClusterConfig`/`ServerConfig` in the teacher's
//! `cluster/types.rs` and `service/config.rs`: a plain struct with a
//! `Default` impl giving every documented default, constructed once at
//! startup and shared behind an `Arc`.

use std::time::Duration;

use balancer_core::WeightEngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    pub weight: WeightEngineConfig,
    /// Fallback `min-units` for namespaces with no explicit setting.
    pub min_units: u32,
    /// Fractional tolerance used when bucketing groups by total space.
    pub total_space_diff_tolerance: f64,
    /// Whether two replicas of the same couple may share a datacenter.
    pub forbidden_dc_sharing_among_groups: bool,
    /// How long the quorum meta writer waits for each group write.
    #[serde(with = "duration_millis")]
    pub wait_timeout: Duration,
    /// Reserved for a future batching scheduler; carried for parity with
    /// the teacher's `max_parallel_migrations`.
    pub max_parallel_build_batches: u32,
    /// Interval between background counter-refresh passes.
    #[serde(with = "duration_millis")]
    pub refresh_interval: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        BalancerConfig {
            weight: WeightEngineConfig::default(),
            min_units: 1,
            total_space_diff_tolerance: 0.05,
            forbidden_dc_sharing_among_groups: true,
            wait_timeout: Duration::from_secs(5),
            max_parallel_build_batches: 2,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
