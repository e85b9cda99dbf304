//! The unit of replication.
//!
//! A record is kind-agnostic on the wire: the kind-specific fields live in
//! `payload` as a JSON object so the store and sync layers never need to know
//! what a note or a task looks like.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

pub const TOMBSTONE_PREFIX: &str = "tombstone_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Note,
    Task,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Note, RecordKind::Task];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Note => "note",
            RecordKind::Task => "task",
        }
    }

    /// Prefix for this kind's persisted entries, e.g. `note_`.
    pub fn key_prefix(self) -> String {
        format!("{}_", self.as_str())
    }

    pub fn storage_key(self, id: &str) -> String {
        format!("{}_{}", self.as_str(), id)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn tombstone_key(id: &str) -> String {
    format!("{TOMBSTONE_PREFIX}{id}")
}

/// Ids become part of storage keys, so they share the key charset.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Random UUID v4, assigned once at creation and never reused.
    pub id: String,
    pub kind: RecordKind,
    pub payload: Map<String, Value>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds. Strictly increases on every local mutation.
    pub modified_at: i64,
    #[serde(default)]
    pub tombstoned: bool,
}

impl Record {
    pub fn new(kind: RecordKind, payload: Map<String, Value>, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: now_ms,
            modified_at: now_ms,
            tombstoned: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.tombstoned
    }

    pub fn storage_key(&self) -> String {
        self.kind.storage_key(&self.id)
    }

    /// Tombstoned copy of this record at `modified_at`. The payload is dropped.
    pub fn tombstone(&self, modified_at: i64) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            payload: Map::new(),
            created_at: self.created_at,
            modified_at,
            tombstoned: true,
        }
    }

    /// Shallow-merge `patch` into the payload. `null` values clear a field.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            if v.is_null() {
                self.payload.remove(k);
            } else {
                self.payload.insert(k.clone(), v.clone());
            }
        }
    }

    /// Stable byte form of everything except the timestamps.
    /// `serde_json::Map` is ordered by key, so equal content yields equal bytes.
    pub fn canonical_content(&self) -> Result<Vec<u8>, ProtoError> {
        let value = serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "payload": self.payload,
            "tombstoned": self.tombstoned,
        });
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn same_content(&self, other: &Record) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.tombstoned == other.tombstoned
            && self.payload == other.payload
    }

    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.id.is_empty() {
            return Err(ProtoError::InvalidRecord("empty id".into()));
        }
        if !is_valid_id(&self.id) {
            return Err(ProtoError::InvalidRecord(format!(
                "{:?}: id may only contain ASCII letters, digits, '_' and '-'",
                self.id
            )));
        }
        if self.modified_at < self.created_at {
            return Err(ProtoError::InvalidRecord(format!(
                "{}: modifiedAt {} precedes createdAt {}",
                self.id, self.modified_at, self.created_at
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtoError> {
        let record: Record = serde_json::from_slice(bytes)?;
        record.validate()?;
        Ok(record)
    }
}
