//! dnp_crypto: Decentralized Notepad cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Randomness comes from the OS; a failing entropy source is a hard error.
//!
//! # Module layout
//! - `kdf`      Argon2id root derivation + HKDF-SHA256 subkeys
//! - `aead`     XChaCha20-Poly1305 encrypt/decrypt helpers and key wrapping
//! - `hash`     BLAKE3 envelope digests, constant-time comparison
//! - `mnemonic` 12-word recovery phrase over a fixed dictionary
//! - `random`   fallible OS randomness
//! - `error`    unified error type

pub mod aead;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod mnemonic;
pub mod random;

pub use error::CryptoError;
pub use kdf::{KdfParams, SecretKey};
pub use mnemonic::{PhraseError, RecoveryPhrase};
