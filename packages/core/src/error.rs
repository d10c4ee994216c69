use thiserror::Error;

/// Error taxonomy for the balancer control plane, shared by core and server.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("namespace {namespace:?} does not exist")]
    UnknownNamespace { namespace: String },

    #[error("namespace {namespace:?} already exists")]
    NamespaceAlreadyExists { namespace: String },

    #[error("couple {couple_id} not found")]
    UnknownCouple { couple_id: String },

    #[error("group {group_id} not found")]
    UnknownGroup { group_id: u32 },

    #[error("group {group_id} is already a member of a couple")]
    GroupAlreadyCoupled { group_id: u32 },

    #[error(
        "insufficient availability for namespace {namespace:?}: found {available} candidate couple(s), need at least {required}"
    )]
    InsufficientAvailability {
        namespace: String,
        available: usize,
        required: usize,
    },

    #[error("no placement satisfies the fault-domain constraints for namespace {namespace:?}")]
    NoFeasiblePlacement { namespace: String },

    #[error("couple {couple_id} is already in state {state}")]
    AlreadyInState { couple_id: String, state: String },

    #[error("couple {couple_id} meta is frozen and cannot be modified")]
    CoupleFrozen { couple_id: String },

    #[error("namespace setting {key:?} is invalid: {reason}")]
    InvalidNamespaceSetting { key: String, reason: String },

    #[error("static couple validation failed: {reason}")]
    InvalidStaticCouple { reason: String },

    #[error("cluster-change lock is already held")]
    LockContended,

    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    #[error("meta blob is corrupt and could not be decoded: {0}")]
    CorruptMeta(#[from] rmp_serde::decode::Error),

    #[error("meta write failed on {failed} of {attempted} group(s), rolled back: {detail}")]
    QuorumWriteFailed {
        attempted: usize,
        failed: usize,
        detail: String,
    },

    #[error(
        "meta write failed on {failed} of {attempted} group(s), and rollback also failed on the rest: couple {couple_id} is left with divergent meta across its members"
    )]
    InconsistentMeta {
        couple_id: String,
        attempted: usize,
        failed: usize,
    },

    #[error("an internal invariant was violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
