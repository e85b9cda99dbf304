//! dnp_store: key management and encrypted local storage
//!
//! # Modules
//! - `kv`         KvBackend trait, in-memory and file-backed implementations
//! - `credential` The persisted `UserCredential`
//! - `vault`      In-memory holder for the active data key
//! - `keys`       KeyManager: create / verify / unlock / recover / lock
//! - `encrypted`  EncryptedStore: encrypt-then-persist for any serde value
//! - `envelope`   Sealing records into wire envelopes and opening them
//! - `error`      StoreError

pub mod credential;
pub mod encrypted;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod kv;
pub mod vault;

pub use credential::{load_credential, save_credential, UserCredential};
pub use encrypted::{EncryptedStore, StorageInfo};
pub use error::StoreError;
pub use keys::{KeyManager, NewCredential};
pub use kv::{FileKv, KvBackend, MemoryKv};
pub use vault::KeyVault;
