//! Sealing records into wire envelopes and opening them again.
//!
//! Opening order matters: the integrity digest is checked first, then the
//! AEAD tag, then the decrypted record must agree with the envelope header.

use dnp_crypto::aead::{open_b64, seal_b64};
use dnp_crypto::hash::{envelope_digest, verify_envelope_digest};
use dnp_crypto::CryptoError;
use dnp_proto::{Record, WireEnvelope};

use crate::encrypted::EncryptedStore;
use crate::error::StoreError;

fn envelope_aad(id: &str) -> Vec<u8> {
    let mut aad = b"dnp-envelope:".to_vec();
    aad.extend_from_slice(id.as_bytes());
    aad
}

fn corrupt(id: &str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptEnvelope {
        id: id.to_string(),
        reason: reason.into(),
    }
}

impl EncryptedStore {
    pub fn seal_envelope(&self, record: &Record) -> Result<WireEnvelope, StoreError> {
        let plaintext = zeroize::Zeroizing::new(record.to_json()?);
        let data = self
            .vault()
            .with_key(|k| Ok(seal_b64(k, &plaintext, &envelope_aad(&record.id))?))?;
        let hash = envelope_digest(&record.id, record.modified_at, &data);
        Ok(WireEnvelope {
            id: record.id.clone(),
            data,
            timestamp: record.modified_at,
            hash,
        })
    }

    /// `NoActiveKey` when locked; `CorruptEnvelope` for anything a peer got wrong.
    pub fn open_envelope(&self, env: &WireEnvelope) -> Result<Record, StoreError> {
        if !self.vault().is_unlocked() {
            return Err(StoreError::NoActiveKey);
        }
        if !verify_envelope_digest(&env.id, env.timestamp, &env.data, &env.hash) {
            return Err(corrupt(&env.id, "integrity digest mismatch"));
        }
        let plaintext = self.vault().with_key(|k| {
            open_b64(k, &env.data, &envelope_aad(&env.id)).map_err(|e| match e {
                CryptoError::AeadDecrypt => corrupt(&env.id, "authentication failed"),
                CryptoError::Base64Decode(_) => corrupt(&env.id, "ciphertext is not base64"),
                other => StoreError::Crypto(other),
            })
        })?;
        let record = Record::from_json(&plaintext)
            .map_err(|e| corrupt(&env.id, format!("undecodable record: {e}")))?;
        if record.id != env.id {
            return Err(corrupt(&env.id, "record id does not match envelope"));
        }
        if record.modified_at != env.timestamp {
            return Err(corrupt(&env.id, "record timestamp does not match envelope"));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dnp_crypto::hash::envelope_digest;
    use dnp_proto::RecordKind;
    use serde_json::json;

    use super::*;
    use crate::kv::MemoryKv;
    use crate::vault::KeyVault;

    fn store(key: u8) -> EncryptedStore {
        let vault = Arc::new(KeyVault::new());
        vault.install(dnp_crypto::SecretKey::from_bytes([key; 32]));
        EncryptedStore::new(Arc::new(MemoryKv::new()), vault)
    }

    fn record() -> Record {
        let payload = json!({"title": "A"}).as_object().cloned().unwrap();
        Record::new(RecordKind::Note, payload, 100)
    }

    #[test]
    fn seal_open_roundtrip() {
        let s = store(1);
        let r = record();
        let env = s.seal_envelope(&r).unwrap();
        assert_eq!(env.id, r.id);
        assert_eq!(env.timestamp, 100);
        assert!(!env.data.contains("title"));
        assert_eq!(s.open_envelope(&env).unwrap(), r);
    }

    #[test]
    fn digest_checked_before_decrypt() {
        let s = store(1);
        let mut env = s.seal_envelope(&record()).unwrap();
        env.timestamp += 1;
        let err = s.open_envelope(&env).unwrap_err();
        assert!(matches!(err, StoreError::CorruptEnvelope { ref reason, .. } if reason.contains("digest")));
    }

    #[test]
    fn rehashed_header_still_rejected() {
        let s = store(1);
        let mut env = s.seal_envelope(&record()).unwrap();
        env.timestamp = 999;
        env.hash = envelope_digest(&env.id, env.timestamp, &env.data);
        let err = s.open_envelope(&env).unwrap_err();
        assert!(matches!(err, StoreError::CorruptEnvelope { ref reason, .. } if reason.contains("timestamp")));
    }

    #[test]
    fn foreign_key_is_corrupt_not_fatal() {
        let env = store(1).seal_envelope(&record()).unwrap();
        let err = store(2).open_envelope(&env).unwrap_err();
        assert!(matches!(err, StoreError::CorruptEnvelope { .. }));
    }
}
