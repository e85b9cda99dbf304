//! Plain-JSON export and import of every live record.
//!
//! The bundle is not encrypted. It carries full records, timestamps included,
//! so importing into another account resolves the same way sync does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub notes: Vec<Value>,
    #[serde(default)]
    pub tasks: Vec<Value>,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    BUNDLE_VERSION
}

impl Bundle {
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, CoreError> {
        let bundle: Self = serde_json::from_str(s)?;
        if bundle.version > BUNDLE_VERSION {
            return Err(CoreError::InvalidInput(format!(
                "bundle version {} is newer than supported ({BUNDLE_VERSION})",
                bundle.version
            )));
        }
        Ok(bundle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Added,
    /// Replaced an older local version.
    Updated,
    /// Local copy is as new or newer.
    Skipped,
    /// Malformed or of the wrong kind.
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub rejected: usize,
}

impl ImportReport {
    pub fn tally(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Added => self.added += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Skipped => self.skipped += 1,
            ImportOutcome::Rejected => self.rejected += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.added + self.updated
    }
}
