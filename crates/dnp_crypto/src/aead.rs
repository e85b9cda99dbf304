//! Authenticated Encryption with Associated Data
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]
//!
//! Stored and transmitted ciphertext is the standard base64 of that layout.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::{SecretKey, KEY_LEN};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

const KEY_WRAP_AAD: &[u8] = b"dnp-key-wrap";

/// Encrypt `plaintext`, prepending a fresh random nonce.
/// `aad` is authenticated but not encrypted.
pub fn encrypt(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce_bytes = crate::random::bytes::<NONCE_LEN>()?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &SecretKey, data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// `encrypt` followed by base64 encoding.
pub fn seal_b64(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
    encrypt(key, plaintext, aad).map(|ct| B64.encode(ct))
}

/// Base64 decoding followed by `decrypt`.
pub fn open_b64(key: &SecretKey, encoded: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let raw = B64.decode(encoded)?;
    decrypt(key, &raw, aad)
}

/// Encrypt a data key under a wrapping key. Returns base64.
pub fn wrap_key(wrapping: &SecretKey, key_to_wrap: &SecretKey) -> Result<String, CryptoError> {
    seal_b64(wrapping, key_to_wrap.as_bytes(), KEY_WRAP_AAD)
}

/// Inverse of `wrap_key`. A wrong wrapping key fails with `AeadDecrypt`.
pub fn unwrap_key(wrapping: &SecretKey, wrapped: &str) -> Result<SecretKey, CryptoError> {
    let plaintext = open_b64(wrapping, wrapped, KEY_WRAP_AAD)?;
    if plaintext.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey("Unwrapped key wrong length".into()));
    }
    SecretKey::from_slice(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> SecretKey {
        SecretKey::from_bytes([b; KEY_LEN])
    }

    #[test]
    fn encrypt_decrypt_with_aad() {
        let k = key(7);
        let ct = encrypt(&k, b"hello notes", b"note_1").unwrap();
        assert_eq!(ct.len(), NONCE_LEN + b"hello notes".len() + TAG_LEN);
        let pt = decrypt(&k, &ct, b"note_1").unwrap();
        assert_eq!(pt.as_slice(), b"hello notes");
    }

    #[test]
    fn nonces_are_fresh() {
        let k = key(1);
        let a = encrypt(&k, b"same", b"").unwrap();
        let b = encrypt(&k, b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_aad_fails() {
        let k = key(2);
        let ct = encrypt(&k, b"payload", b"note_a").unwrap();
        assert!(matches!(decrypt(&k, &ct, b"note_b"), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key(3);
        let mut ct = encrypt(&k, b"payload", b"").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(decrypt(&k, &ct, b""), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(decrypt(&key(4), &[0u8; 10], b""), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn key_wrap_roundtrip_and_wrong_key() {
        let kek = key(9);
        let dek = SecretKey::generate().unwrap();
        let wrapped = wrap_key(&kek, &dek).unwrap();
        let back = unwrap_key(&kek, &wrapped).unwrap();
        assert_eq!(back.as_bytes(), dek.as_bytes());
        assert!(matches!(unwrap_key(&key(10), &wrapped), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn invalid_base64_is_reported() {
        assert!(matches!(
            open_b64(&key(5), "not base64!!", b""),
            Err(CryptoError::Base64Decode(_))
        ));
    }
}
