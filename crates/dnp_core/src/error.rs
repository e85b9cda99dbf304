use dnp_proto::{ProtoError, RecordKind};
use dnp_store::StoreError;
use dnp_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session is closed")]
    Closed,

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl From<ProtoError> for CoreError {
    fn from(e: ProtoError) -> Self {
        CoreError::Store(StoreError::Proto(e))
    }
}

impl CoreError {
    pub fn not_found(kind: RecordKind, id: &str) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True when the failure came from a locked or closed session.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            CoreError::Closed
                | CoreError::Store(StoreError::NoActiveKey)
                | CoreError::Sync(SyncError::Closed)
                | CoreError::Sync(SyncError::Store(StoreError::NoActiveKey))
        )
    }
}
