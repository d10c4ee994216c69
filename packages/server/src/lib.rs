//! Balancer server -- the running control plane: process-wide registries,
//! the cluster-change lock, the quorum meta writer, couple lifecycle
//! orchestration, the background refresh worker, and the request facade
//! operator tooling calls into.

pub mod collaborators;
pub mod config;
pub mod facade;
pub mod lifecycle;
pub mod lock;
pub mod meta_writer;
pub mod state;
pub mod worker;

pub use collaborators::{JobRunner, NamespaceSettingsStore, StorageDaemonClient};
pub use config::BalancerConfig;
pub use facade::{BalancerFacade, GroupWeightEntry, NamespaceState};
pub use lifecycle::{BuildOptions, LifecycleService};
pub use lock::{DistributedLock, LocalClusterLock, LockGuard, CLUSTER_CHANGES_LOCK};
pub use meta_writer::MetaWriter;
pub use state::ClusterState;
pub use worker::RefreshWorker;

/// Install the process-wide `tracing` subscriber, honoring `RUST_LOG`.
/// Call once at process startup, before constructing any service.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
