use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
