//! Sync wire envelope. What the relay and peers see.
//!
//! Peers see only:
//!   - id        (the record id, needed for supersede / LWW)
//!   - timestamp (the record's modifiedAt, needed for ordering)
//!   - data      (opaque ciphertext, base64 of nonce || ct+tag)
//!   - hash      (hex integrity digest over id, timestamp, data)
//!
//! Kind, payload and the tombstone flag live inside `data`. Deletion is not
//! special-cased on the wire.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub id: String,
    pub data: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub hash: String,
}

impl WireEnvelope {
    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_wire_format() {
        let env = WireEnvelope {
            id: "n1".into(),
            data: "Y3Q=".into(),
            timestamp: 1_700_000_000_000,
            hash: "ab".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(v["id"], "n1");
        assert_eq!(v["data"], "Y3Q=");
        assert_eq!(v["timestamp"], 1_700_000_000_000i64);
        assert_eq!(v["hash"], "ab");
    }

    #[test]
    fn missing_field_is_rejected() {
        assert!(WireEnvelope::from_json(r#"{"id":"x","data":"","timestamp":1}"#).is_err());
    }
}
