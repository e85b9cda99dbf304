use thiserror::Error;

use dnp_crypto::{CryptoError, PhraseError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Passphrase rejected: {0}")]
    WeakPassphrase(String),

    #[error("Invalid recovery phrase: {0}")]
    InvalidRecoveryPhrase(#[from] PhraseError),

    #[error("No active key: session is locked")]
    NoActiveKey,

    #[error("Decryption failed for {0} (corrupt data or wrong key)")]
    DecryptionFailed(String),

    #[error("No credential found: create an account first")]
    NoCredential,

    #[error("A credential already exists")]
    CredentialExists,

    #[error("Corrupt envelope {id}: {reason}")]
    CorruptEnvelope { id: String, reason: String },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Record error: {0}")]
    Proto(#[from] dnp_proto::ProtoError),
}
