use thiserror::Error;

use dnp_store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Network call timed out after {0} ms")]
    Timeout(u64),

    #[error("Corrupt envelope {id}: {reason}")]
    CorruptEnvelope { id: String, reason: String },

    #[error("Sync engine is closed")]
    Closed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Transient network failures. These stay on the queue and are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::DeliveryFailed(_) | SyncError::Timeout(_))
    }
}
