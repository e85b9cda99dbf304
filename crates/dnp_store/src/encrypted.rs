//! EncryptedStore: serialize, encrypt, persist. Knows nothing about notes or tasks.
//!
//! Every value is sealed with a fresh nonce and the storage key as AAD, so a
//! blob copied under a different key fails authentication.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use dnp_crypto::aead::{open_b64, seal_b64};
use dnp_crypto::CryptoError;

use crate::error::StoreError;
use crate::kv::KvBackend;
use crate::vault::KeyVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Clone)]
pub struct EncryptedStore {
    kv: Arc<dyn KvBackend>,
    vault: Arc<KeyVault>,
}

impl EncryptedStore {
    pub fn new(kv: Arc<dyn KvBackend>, vault: Arc<KeyVault>) -> Self {
        Self { kv, vault }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.kv
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
        let sealed = self
            .vault
            .with_key(|k| Ok(seal_b64(k, &plaintext, key.as_bytes())?))?;
        self.kv.put(key, &sealed)?;
        debug!(key, "stored encrypted value");
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        if !self.vault.is_unlocked() {
            return Err(StoreError::NoActiveKey);
        }
        let Some(sealed) = self.kv.get(key)? else {
            return Ok(None);
        };
        let plaintext = self.vault.with_key(|k| {
            open_b64(k, &sealed, key.as_bytes()).map_err(|e| match e {
                CryptoError::AeadDecrypt | CryptoError::Base64Decode(_) => {
                    warn!(key, "stored value failed authentication");
                    StoreError::DecryptionFailed(key.to_string())
                }
                other => StoreError::Crypto(other),
            })
        })?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|_| StoreError::DecryptionFailed(key.to_string()))?;
        Ok(Some(value))
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.kv.delete(key)
    }

    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.kv.keys(prefix)
    }

    /// Entry count and stored byte size across the whole backend.
    pub fn storage_info(&self) -> Result<StorageInfo, StoreError> {
        let mut info = StorageInfo::default();
        for key in self.kv.keys("")? {
            if let Some(v) = self.kv.get(&key)? {
                info.entries += 1;
                info.bytes += key.len() + v.len();
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use dnp_crypto::SecretKey;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        title: String,
        n: u32,
    }

    fn unlocked() -> (EncryptedStore, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        let vault = Arc::new(KeyVault::new());
        vault.install(SecretKey::from_bytes([42; 32]));
        (EncryptedStore::new(kv.clone(), vault), kv)
    }

    #[test]
    fn put_get_roundtrip() {
        let (store, kv) = unlocked();
        let doc = Doc { title: "hello".into(), n: 3 };
        store.put("note_1", &doc).unwrap();
        assert_eq!(store.get::<Doc>("note_1").unwrap(), Some(doc));
        let raw = kv.get("note_1").unwrap().unwrap();
        assert!(!raw.contains("hello"));
    }

    #[test]
    fn same_value_encrypts_differently() {
        let (store, kv) = unlocked();
        store.put("note_a", &"same").unwrap();
        store.put("note_b", &"same").unwrap();
        assert_ne!(kv.get("note_a").unwrap(), kv.get("note_b").unwrap());
    }

    #[test]
    fn absent_key_is_none_and_delete_is_idempotent() {
        let (store, _) = unlocked();
        assert_eq!(store.get::<Doc>("note_x").unwrap(), None);
        store.delete("note_x").unwrap();
        store.delete("note_x").unwrap();
    }

    #[test]
    fn locked_store_refuses() {
        let (store, _) = unlocked();
        store.put("note_1", &1u32).unwrap();
        store.vault().lock();
        assert!(matches!(store.put("note_2", &2u32), Err(StoreError::NoActiveKey)));
        assert!(matches!(store.get::<u32>("note_1"), Err(StoreError::NoActiveKey)));
    }

    #[test]
    fn moved_or_tampered_blob_fails() {
        let (store, kv) = unlocked();
        store.put("note_1", &1u32).unwrap();
        let blob = kv.get("note_1").unwrap().unwrap();
        kv.tamper("note_2", &blob);
        assert!(matches!(store.get::<u32>("note_2"), Err(StoreError::DecryptionFailed(_))));
        kv.tamper("note_1", "garbage!!");
        assert!(matches!(store.get::<u32>("note_1"), Err(StoreError::DecryptionFailed(_))));
    }

    #[test]
    fn wrong_key_fails() {
        let (store, kv) = unlocked();
        store.put("note_1", &1u32).unwrap();
        let other_vault = Arc::new(KeyVault::new());
        other_vault.install(SecretKey::from_bytes([7; 32]));
        let other = EncryptedStore::new(kv, other_vault);
        assert!(matches!(other.get::<u32>("note_1"), Err(StoreError::DecryptionFailed(_))));
    }

    #[test]
    fn storage_info_counts_entries() {
        let (store, _) = unlocked();
        assert_eq!(store.storage_info().unwrap(), StorageInfo::default());
        store.put("note_1", &1u32).unwrap();
        store.put("task_1", &2u32).unwrap();
        let info = store.storage_info().unwrap();
        assert_eq!(info.entries, 2);
        assert!(info.bytes > 0);
    }
}
