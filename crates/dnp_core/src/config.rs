use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dnp_crypto::KdfParams;
use dnp_sync::SyncConfig;

use crate::error::CoreError;

pub const DEFAULT_MIN_PASSPHRASE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotepadConfig {
    /// Used for new credentials only; existing ones carry their own.
    pub kdf: KdfParams,
    pub sync: SyncConfig,
    pub min_passphrase_len: usize,
}

impl Default for NotepadConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            sync: SyncConfig::default(),
            min_passphrase_len: DEFAULT_MIN_PASSPHRASE_LEN,
        }
    }
}

impl NotepadConfig {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_passphrase_len == 0 {
            return Err(CoreError::Config("minPassphraseLen must be at least 1".into()));
        }
        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(CoreError::Config("kdf iterations and parallelism must be non-zero".into()));
        }
        if self.sync.heartbeat_interval_ms == 0 || self.sync.send_timeout_ms == 0 {
            return Err(CoreError::Config("sync intervals must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NotepadConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, NotepadConfig::default());
        assert_eq!(cfg.min_passphrase_len, 8);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"sync":{"heartbeatIntervalMs":5000}}"#).unwrap();
        let cfg = NotepadConfig::load(&path).unwrap();
        assert_eq!(cfg.sync.heartbeat_interval_ms, 5000);
        assert_eq!(cfg.sync.send_timeout_ms, SyncConfig::default().send_timeout_ms);
        assert_eq!(cfg.kdf, KdfParams::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = NotepadConfig {
            min_passphrase_len: 12,
            ..NotepadConfig::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(NotepadConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn zero_length_policy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"minPassphraseLen":0}"#).unwrap();
        assert!(matches!(NotepadConfig::load(&path), Err(CoreError::Config(_))));
    }
}
