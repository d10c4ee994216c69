//! Quorum meta writer: writes the couple meta blob to every member group,
//! rolling back on any failure.
//!
//! Grounded on `consistent_write`/`make_symm_group`/`kill_symm_group` in
//! `examples/original_source/src/cocaine-app/balancer.py`: write to every
//! group, and if any write fails, remove the meta from the groups that did
//! succeed before reporting the error -- a couple is never left with some
//! members carrying the new meta and others not. Each per-group write/remove
//! is retried a bounded number of times before being counted as failed, and
//! a successful write is read back and decoded to catch a storage daemon
//! that accepted the blob but stored it corrupt.

use std::sync::Arc;

use balancer_core::{couple_id, BalancerError, CoupleMeta, Result};
use tracing::{error, info, warn};

use crate::collaborators::StorageDaemonClient;

/// Bounded retry count for a single group's write/remove, mirroring
/// `consistent_write`'s retry loop around each member's RPC.
const MAX_ATTEMPTS: u32 = 3;

pub struct MetaWriter {
    storage: Arc<dyn StorageDaemonClient>,
}

impl MetaWriter {
    pub fn new(storage: Arc<dyn StorageDaemonClient>) -> Self {
        MetaWriter { storage }
    }

    /// Write `meta` to every group in `group_ids`, retrying each group's
    /// write up to [`MAX_ATTEMPTS`] times before counting it as failed. On
    /// partial failure, remove the meta from whichever groups already
    /// accepted it and return [`BalancerError::QuorumWriteFailed`]; if the
    /// rollback itself fails on any group, the couple is left with
    /// divergent meta across its members and
    /// [`BalancerError::InconsistentMeta`] is returned instead. On full
    /// success, read the blob back from every member and decode it, so a
    /// storage daemon that silently corrupts what it was handed is caught
    /// immediately rather than on the next refresh.
    pub async fn write(&self, group_ids: &[u32], meta: &CoupleMeta) -> Result<()> {
        let bytes = meta.encode()?;
        let mut succeeded = Vec::with_capacity(group_ids.len());
        let mut failed = Vec::new();

        for &group_id in group_ids {
            match self.write_with_retry(group_id, &bytes).await {
                Ok(()) => succeeded.push(group_id),
                Err(e) => {
                    warn!(group_id, error = %e, "meta write failed after retries");
                    failed.push(group_id);
                }
            }
        }

        if !failed.is_empty() {
            let mut rollback_failed = Vec::new();
            for &group_id in &succeeded {
                if let Err(e) = self.storage.remove_meta(group_id).await {
                    error!(group_id, error = %e, "rollback of meta write also failed");
                    rollback_failed.push(group_id);
                }
            }
            if !rollback_failed.is_empty() {
                return Err(BalancerError::InconsistentMeta {
                    couple_id: couple_id(&meta.couple_group_ids),
                    attempted: group_ids.len(),
                    failed: failed.len(),
                });
            }
            return Err(BalancerError::QuorumWriteFailed {
                attempted: group_ids.len(),
                failed: failed.len(),
                detail: format!("groups failed: {failed:?}"),
            });
        }

        for &group_id in group_ids {
            let stored = self.storage.read_meta(group_id).await?;
            let Some(stored) = stored else {
                return Err(BalancerError::InconsistentMeta {
                    couple_id: couple_id(&meta.couple_group_ids),
                    attempted: group_ids.len(),
                    failed: 1,
                });
            };
            CoupleMeta::decode(&stored)?;
        }

        info!(groups = ?group_ids, "couple meta written to all members");
        Ok(())
    }

    async fn write_with_retry(&self, group_id: u32, bytes: &[u8]) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.storage.write_meta(group_id, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(group_id, attempt, error = %e, "meta write attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(BalancerError::Internal("write retries exhausted with no error".to_string())))
    }

    async fn remove_with_retry(&self, group_id: u32) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.storage.remove_meta(group_id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(group_id, attempt, error = %e, "meta removal attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(BalancerError::Internal("remove retries exhausted with no error".to_string())))
    }

    /// Remove meta from every group in `group_ids`, mirroring
    /// `kill_symm_group`. Any individual failure (after [`MAX_ATTEMPTS`]
    /// retries) is reported but does not stop removal from the remaining
    /// groups.
    pub async fn remove(&self, couple_id: &str, group_ids: &[u32]) -> Result<()> {
        let mut failed = Vec::new();
        for &group_id in group_ids {
            if let Err(e) = self.remove_with_retry(group_id).await {
                warn!(group_id, error = %e, "meta removal failed after retries");
                failed.push(group_id);
            }
        }
        if !failed.is_empty() {
            return Err(BalancerError::InconsistentMeta {
                couple_id: couple_id.to_string(),
                attempted: group_ids.len(),
                failed: failed.len(),
            });
        }
        Ok(())
    }
}
