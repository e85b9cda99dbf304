//! KeyVault: the active record data key, held in memory for one session.
//!
//! Crypto callers borrow the key through `with_key`, which holds a read lock
//! for the duration of the operation. `lock` takes the write lock, so it waits
//! for in-flight operations to finish and every later call sees no key.

use parking_lot::RwLock;

use dnp_crypto::SecretKey;

use crate::error::StoreError;

#[derive(Default)]
pub struct KeyVault {
    inner: RwLock<Option<SecretKey>>,
}

impl KeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(&self, key: SecretKey) {
        *self.inner.write() = Some(key);
    }

    /// Discard the key. Returns `true` only for the call that actually dropped it.
    pub fn lock(&self) -> bool {
        self.inner.write().take().is_some()
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&SecretKey) -> Result<R, StoreError>,
    {
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(StoreError::NoActiveKey),
        }
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_vault_refuses_access() {
        let vault = KeyVault::new();
        assert!(matches!(vault.with_key(|_| Ok(())), Err(StoreError::NoActiveKey)));
    }

    #[test]
    fn lock_is_idempotent() {
        let vault = KeyVault::new();
        vault.install(SecretKey::from_bytes([1; 32]));
        assert!(vault.is_unlocked());
        assert!(vault.with_key(|k| Ok(k.as_bytes()[0])).unwrap() == 1);
        assert!(vault.lock());
        assert!(!vault.lock());
        assert!(!vault.is_unlocked());
    }
}
