//! External collaborator traits: the narrow seams where this control plane
//! talks to systems explicitly out of scope (the storage daemon wire
//! protocol, namespace settings persistence, and job scheduling).
//!
//! Grounded on `traits::ServerStorage` in the teacher's `src/traits.rs`:
//! one `#[async_trait]` per collaborator, named by what it does rather than
//! by the protocol underneath it.

use async_trait::async_trait;
use balancer_core::{NamespaceSettings, RawNodeSample, Result};

/// Talks to the storage daemon running on each node: reads/writes the
/// couple meta blob and samples load counters. The wire protocol itself
/// (named out of scope) lives entirely behind this trait.
#[async_trait]
pub trait StorageDaemonClient: Send + Sync {
    async fn write_meta(&self, group_id: u32, bytes: &[u8]) -> Result<()>;
    async fn remove_meta(&self, group_id: u32) -> Result<()>;
    async fn read_meta(&self, group_id: u32) -> Result<Option<Vec<u8>>>;
    async fn sample_node(&self, group_id: u32) -> Result<Vec<RawNodeSample>>;
}

/// Persists namespace settings across restarts.
#[async_trait]
pub trait NamespaceSettingsStore: Send + Sync {
    async fn load(&self, namespace: &str) -> Result<Option<NamespaceSettings>>;
    async fn save(&self, namespace: &str, settings: &NamespaceSettings) -> Result<()>;
    async fn delete(&self, namespace: &str) -> Result<()>;
}

/// Schedules longer-running maintenance jobs. Per the Open Question
/// resolution in SPEC_FULL.md §9, recovery jobs are keyed by couple, not by
/// group, so that two recoveries for groups in the same couple serialize.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn schedule_recover(&self, couple_id: &str) -> Result<()>;
    async fn schedule_defrag(&self, group_id: u32) -> Result<()>;
}
