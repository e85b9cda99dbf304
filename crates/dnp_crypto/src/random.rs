//! OS randomness with explicit failure.
//!
//! Credential and phrase generation must not proceed on a degraded RNG, so
//! every helper here uses `try_fill_bytes` and surfaces the failure instead of
//! panicking inside `OsRng`.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

pub fn fill(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))
}

pub fn bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill(&mut out)?;
    Ok(out)
}

/// Fresh random 16-byte salt (store alongside the credential, not secret).
pub fn salt() -> Result<[u8; 16], CryptoError> {
    bytes::<16>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salts_differ() {
        let a = salt().unwrap();
        let b = salt().unwrap();
        assert_ne!(a, b);
    }
}
