//! Key derivation functions
//!
//! `derive_root`: Argon2id over (secret, salt). Cost is fixed by `KdfParams`,
//!   which are stored with the credential.
//!
//! `derive_passphrase_keys`: splits the root into a verifier (stored) and a
//!   key-encryption key (never stored) via HKDF-SHA256.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"dnp-kdf-v1";
const INFO_VERIFIER: &[u8] = b"dnp-passphrase-verifier";
const INFO_KEK: &[u8] = b"dnp-key-encryption-key";
const INFO_RECOVERY: &[u8] = b"dnp-recovery-wrap-key";

// ── Parameters ────────────────────────────────────────────────────────────────

/// Argon2id cost parameters. Output length is always `KEY_LEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Tuned for interactive desktop use: 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost. Only for tests and fixtures, never for real credentials.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {e}")))
    }
}

// ── Key material ──────────────────────────────────────────────────────────────

/// 32 bytes of symmetric key material. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Fresh random key (the record data key is generated this way).
    pub fn generate() -> Result<Self, CryptoError> {
        crate::random::bytes::<KEY_LEN>().map(Self)
    }

    /// Avoid storing or logging this value. Use only for immediate crypto operations.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKey").field(&"[REDACTED]").finish()
    }
}

/// The two halves derived from a passphrase.
pub struct PassphraseKeys {
    /// Stored (hex) as the credential's verification hash.
    pub verifier: [u8; KEY_LEN],
    /// Wraps the record data key; never persisted.
    pub kek: SecretKey,
}

impl Drop for PassphraseKeys {
    fn drop(&mut self) {
        self.verifier.zeroize();
    }
}

// ── Argon2id ──────────────────────────────────────────────────────────────────

/// Derive the Argon2id root from a secret and salt.
pub fn derive_root(secret: &[u8], salt: &[u8], params: KdfParams) -> Result<SecretKey, CryptoError> {
    if salt.len() < 16 {
        return Err(CryptoError::KeyDerivation(
            "salt must be at least 16 bytes".into(),
        ));
    }
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(secret, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let key = SecretKey(output);
    output.zeroize();
    Ok(key)
}

/// Derive verifier + KEK for a passphrase. Deterministic in (passphrase, salt, params).
pub fn derive_passphrase_keys(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<PassphraseKeys, CryptoError> {
    let root = derive_root(passphrase.as_bytes(), salt, params)?;
    let mut verifier = [0u8; KEY_LEN];
    let mut kek = [0u8; KEY_LEN];
    hkdf_expand(root.as_bytes(), Some(HKDF_SALT), INFO_VERIFIER, &mut verifier)?;
    hkdf_expand(root.as_bytes(), Some(HKDF_SALT), INFO_KEK, &mut kek)?;
    let keys = PassphraseKeys {
        verifier,
        kek: SecretKey(kek),
    };
    kek.zeroize();
    Ok(keys)
}

/// Derive the key that wraps the data key under the recovery phrase.
pub fn derive_recovery_key(
    phrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<SecretKey, CryptoError> {
    let root = derive_root(phrase.as_bytes(), salt, params)?;
    let mut out = [0u8; KEY_LEN];
    hkdf_expand(root.as_bytes(), Some(HKDF_SALT), INFO_RECOVERY, &mut out)?;
    let key = SecretKey(out);
    out.zeroize();
    Ok(key)
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"unique-salt-1234567890";

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_passphrase_keys("correct horse", SALT, KdfParams::insecure_fast()).unwrap();
        let b = derive_passphrase_keys("correct horse", SALT, KdfParams::insecure_fast()).unwrap();
        assert_eq!(a.verifier, b.verifier);
        assert_eq!(a.kek.as_bytes(), b.kek.as_bytes());
    }

    #[test]
    fn different_passphrase_different_verifier() {
        let a = derive_passphrase_keys("passphrase-one", SALT, KdfParams::insecure_fast()).unwrap();
        let b = derive_passphrase_keys("passphrase-two", SALT, KdfParams::insecure_fast()).unwrap();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn verifier_and_kek_are_independent() {
        let keys = derive_passphrase_keys("passphrase", SALT, KdfParams::insecure_fast()).unwrap();
        assert_ne!(&keys.verifier, keys.kek.as_bytes());
    }

    #[test]
    fn short_salt_rejected() {
        let err = derive_root(b"pw", b"short", KdfParams::insecure_fast()).unwrap_err();
        assert!(err.to_string().contains("at least 16 bytes"));
    }

    #[test]
    fn secret_key_debug_redacts() {
        let key = SecretKey::from_bytes([0xAB; KEY_LEN]);
        let out = format!("{key:?}");
        assert!(out.contains("REDACTED"));
        assert!(!out.contains("ab"));
    }
}
