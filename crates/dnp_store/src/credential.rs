//! Persisted credential. Lives outside the encrypted record space because it
//! must be readable before any key exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dnp_crypto::KdfParams;

use crate::error::StoreError;
use crate::kv::KvBackend;

pub const CREDENTIAL_KEY: &str = "credential";
pub const CREDENTIAL_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredential {
    pub version: u8,
    pub salt_hex: String,
    /// Hex HKDF subkey of the Argon2id root. Not reversible to the passphrase.
    pub key_verification_hash: String,
    /// Recovery phrase sealed under the passphrase key-encryption key.
    pub encrypted_recovery_phrase: String,
    /// Record data key wrapped under the passphrase key-encryption key.
    pub wrapped_key: String,
    pub recovery_salt_hex: String,
    /// Record data key wrapped under the phrase-derived key.
    pub recovery_wrapped_key: String,
    pub kdf: KdfParams,
    pub created_at: DateTime<Utc>,
}

impl UserCredential {
    pub fn salt(&self) -> Result<Vec<u8>, StoreError> {
        decode_hex(&self.salt_hex)
    }

    pub fn recovery_salt(&self) -> Result<Vec<u8>, StoreError> {
        decode_hex(&self.recovery_salt_hex)
    }

    pub fn verifier(&self) -> Result<Vec<u8>, StoreError> {
        decode_hex(&self.key_verification_hash)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, StoreError> {
    hex::decode(s).map_err(|e| StoreError::Crypto(e.into()))
}

pub fn load_credential(kv: &dyn KvBackend) -> Result<Option<UserCredential>, StoreError> {
    match kv.get(CREDENTIAL_KEY)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_credential(kv: &dyn KvBackend, credential: &UserCredential) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(credential)?;
    kv.put(CREDENTIAL_KEY, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn sample() -> UserCredential {
        UserCredential {
            version: CREDENTIAL_VERSION,
            salt_hex: "00".repeat(16),
            key_verification_hash: "ab".repeat(32),
            encrypted_recovery_phrase: "cGhyYXNl".into(),
            wrapped_key: "d3JhcA==".into(),
            recovery_salt_hex: "11".repeat(16),
            recovery_wrapped_key: "cmVj".into(),
            kdf: KdfParams::insecure_fast(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn persisted_with_camel_case_fields() {
        let kv = MemoryKv::new();
        save_credential(&kv, &sample()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&kv.get(CREDENTIAL_KEY).unwrap().unwrap()).unwrap();
        assert!(raw.get("saltHex").is_some());
        assert!(raw.get("keyVerificationHash").is_some());
        assert!(raw.get("encryptedRecoveryPhrase").is_some());
        assert_eq!(raw["kdf"]["memoryKib"], 256);
    }

    #[test]
    fn load_roundtrip_and_absent() {
        let kv = MemoryKv::new();
        assert!(load_credential(&kv).unwrap().is_none());
        let cred = sample();
        save_credential(&kv, &cred).unwrap();
        assert_eq!(load_credential(&kv).unwrap(), Some(cred));
    }

    #[test]
    fn bad_hex_is_an_error() {
        let mut cred = sample();
        cred.salt_hex = "zz".into();
        assert!(matches!(cred.salt(), Err(StoreError::Crypto(_))));
    }
}
