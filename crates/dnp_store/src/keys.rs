//! KeyManager: passphrase credentials, unlock, and phrase recovery.
//!
//! Layout of a credential:
//!
//! ```text
//! passphrase ──Argon2id(salt)──► root ──HKDF──► verifier (stored, hex)
//!                                        └─────► KEK ──wraps──► DEK, phrase
//! phrase ─────Argon2id(recovery salt)──► root ──HKDF──► RK ──wraps──► DEK
//! ```
//!
//! The DEK is the key records are encrypted with. It is created once and
//! survives passphrase changes and recovery, so stored records stay readable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use dnp_crypto::aead::{open_b64, seal_b64, unwrap_key, wrap_key};
use dnp_crypto::hash::constant_time_eq;
use dnp_crypto::kdf::{derive_passphrase_keys, derive_recovery_key, PassphraseKeys};
use dnp_crypto::{random, CryptoError, KdfParams, PhraseError, RecoveryPhrase, SecretKey};

use crate::credential::{UserCredential, CREDENTIAL_VERSION};
use crate::error::StoreError;
use crate::vault::KeyVault;

const PHRASE_AAD: &[u8] = b"dnp-recovery-phrase";

pub struct NewCredential {
    pub credential: UserCredential,
    /// Plaintext phrase, to be shown to the user once.
    pub recovery_phrase: RecoveryPhrase,
}

pub struct KeyManager {
    vault: Arc<KeyVault>,
    params: KdfParams,
    min_passphrase_len: usize,
}

impl KeyManager {
    pub fn new(vault: Arc<KeyVault>, params: KdfParams, min_passphrase_len: usize) -> Self {
        Self {
            vault,
            params,
            min_passphrase_len,
        }
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Non-blank and at least the configured length.
    pub fn validate_passphrase(&self, passphrase: &str) -> Result<(), StoreError> {
        if passphrase.trim().is_empty() {
            return Err(StoreError::WeakPassphrase("passphrase is empty".into()));
        }
        if passphrase.chars().count() < self.min_passphrase_len {
            return Err(StoreError::WeakPassphrase(format!(
                "passphrase must be at least {} characters",
                self.min_passphrase_len
            )));
        }
        Ok(())
    }

    /// New salt, new DEK, new recovery phrase. Leaves the manager unlocked with the new DEK.
    pub fn create_credential(&self, passphrase: &str) -> Result<NewCredential, StoreError> {
        self.validate_passphrase(passphrase)?;
        let dek = SecretKey::generate()?;
        let phrase = RecoveryPhrase::generate()?;

        let recovery_salt = random::salt()?;
        let rk = derive_recovery_key(phrase.expose(), &recovery_salt, self.params)?;
        let recovery_wrapped_key = wrap_key(&rk, &dek)?;

        let credential = self.seal_credential(
            passphrase,
            &dek,
            &phrase,
            hex::encode(recovery_salt),
            recovery_wrapped_key,
        )?;
        self.vault.install(dek);
        info!("credential created");
        Ok(NewCredential {
            credential,
            recovery_phrase: phrase,
        })
    }

    /// Constant-time comparison against the stored verifier. Never errors.
    pub fn verify(&self, passphrase: &str, credential: &UserCredential) -> bool {
        match self.derive_and_check(passphrase, credential) {
            Ok(keys) => keys.is_some(),
            Err(e) => {
                warn!(error = %e, "passphrase verification could not run");
                false
            }
        }
    }

    /// Verify, unwrap the DEK, and make it the active key.
    pub fn unlock(&self, passphrase: &str, credential: &UserCredential) -> Result<(), StoreError> {
        let keys = self
            .derive_and_check(passphrase, credential)?
            .ok_or(StoreError::InvalidPassphrase)?;
        let dek = unwrap_key(&keys.kek, &credential.wrapped_key)
            .map_err(|e| map_decrypt(e, "wrapped data key"))?;
        self.vault.install(dek);
        info!("session unlocked");
        Ok(())
    }

    /// Rebind the credential to `new_passphrase` using the recovery phrase.
    ///
    /// Format is checked before any key derivation. The DEK and the phrase
    /// are carried over unchanged; salt and verifier are fresh.
    pub fn recover(
        &self,
        phrase_input: &str,
        new_passphrase: &str,
        credential: &UserCredential,
    ) -> Result<UserCredential, StoreError> {
        let phrase = RecoveryPhrase::parse(phrase_input)?;
        self.validate_passphrase(new_passphrase)?;

        let recovery_salt = credential.recovery_salt()?;
        let rk = derive_recovery_key(phrase.expose(), &recovery_salt, credential.kdf)?;
        let dek = match unwrap_key(&rk, &credential.recovery_wrapped_key) {
            Ok(dek) => dek,
            Err(CryptoError::AeadDecrypt) => {
                warn!("recovery phrase did not unlock the data key");
                return Err(PhraseError::Mismatch.into());
            }
            Err(e) => return Err(e.into()),
        };

        let fresh = self.seal_credential(
            new_passphrase,
            &dek,
            &phrase,
            credential.recovery_salt_hex.clone(),
            credential.recovery_wrapped_key.clone(),
        )?;
        self.vault.install(dek);
        info!("credential recovered under a new passphrase");
        Ok(fresh)
    }

    /// Verify `old`, then issue a credential for `new` over the same DEK and phrase.
    pub fn change_passphrase(
        &self,
        old: &str,
        new: &str,
        credential: &UserCredential,
    ) -> Result<UserCredential, StoreError> {
        self.validate_passphrase(new)?;
        let keys = self
            .derive_and_check(old, credential)?
            .ok_or(StoreError::InvalidPassphrase)?;
        let dek = unwrap_key(&keys.kek, &credential.wrapped_key)
            .map_err(|e| map_decrypt(e, "wrapped data key"))?;
        let phrase = Self::open_phrase(&keys, credential)?;
        let fresh = self.seal_credential(
            new,
            &dek,
            &phrase,
            credential.recovery_salt_hex.clone(),
            credential.recovery_wrapped_key.clone(),
        )?;
        self.vault.install(dek);
        info!("passphrase changed");
        Ok(fresh)
    }

    /// Decrypt the stored recovery phrase so it can be shown again.
    pub fn reveal_recovery_phrase(
        &self,
        passphrase: &str,
        credential: &UserCredential,
    ) -> Result<RecoveryPhrase, StoreError> {
        let keys = self
            .derive_and_check(passphrase, credential)?
            .ok_or(StoreError::InvalidPassphrase)?;
        Self::open_phrase(&keys, credential)
    }

    /// Discard the active key. Returns `true` the first time only.
    pub fn lock(&self) -> bool {
        let dropped = self.vault.lock();
        if dropped {
            info!("session locked");
        }
        dropped
    }

    pub fn is_unlocked(&self) -> bool {
        self.vault.is_unlocked()
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn derive_and_check(
        &self,
        passphrase: &str,
        credential: &UserCredential,
    ) -> Result<Option<PassphraseKeys>, StoreError> {
        let salt = credential.salt()?;
        let expected = credential.verifier()?;
        let keys = derive_passphrase_keys(passphrase, &salt, credential.kdf)?;
        if constant_time_eq(&keys.verifier, &expected) {
            Ok(Some(keys))
        } else {
            Ok(None)
        }
    }

    fn open_phrase(keys: &PassphraseKeys, credential: &UserCredential) -> Result<RecoveryPhrase, StoreError> {
        let plain = open_b64(&keys.kek, &credential.encrypted_recovery_phrase, PHRASE_AAD)
            .map_err(|e| map_decrypt(e, "recovery phrase"))?;
        let text = std::str::from_utf8(&plain)
            .map_err(|_| StoreError::DecryptionFailed("recovery phrase".into()))?;
        Ok(RecoveryPhrase::parse(text)?)
    }

    fn seal_credential(
        &self,
        passphrase: &str,
        dek: &SecretKey,
        phrase: &RecoveryPhrase,
        recovery_salt_hex: String,
        recovery_wrapped_key: String,
    ) -> Result<UserCredential, StoreError> {
        let salt = random::salt()?;
        let keys = derive_passphrase_keys(passphrase, &salt, self.params)?;
        Ok(UserCredential {
            version: CREDENTIAL_VERSION,
            salt_hex: hex::encode(salt),
            key_verification_hash: hex::encode(keys.verifier),
            encrypted_recovery_phrase: seal_b64(&keys.kek, phrase.expose().as_bytes(), PHRASE_AAD)?,
            wrapped_key: wrap_key(&keys.kek, dek)?,
            recovery_salt_hex,
            recovery_wrapped_key,
            kdf: self.params,
            created_at: Utc::now(),
        })
    }
}

fn map_decrypt(e: CryptoError, what: &str) -> StoreError {
    match e {
        CryptoError::AeadDecrypt => StoreError::DecryptionFailed(what.to_string()),
        other => StoreError::Crypto(other),
    }
}
