//! Key-value persistence backends.
//!
//! Values are opaque strings (base64 ciphertext or plain credential JSON).
//! Keys are restricted to `[A-Za-z0-9_-]` so they map directly to file names.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::StoreError;

pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Sorted keys starting with `prefix` (empty prefix lists everything).
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a raw value. Lets tests corrupt stored ciphertext.
    pub fn tamper(&self, key: &str, value: &str) {
        self.map.write().insert(key.to_string(), value.to_string());
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.map.write().remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .map
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ── File-backed ───────────────────────────────────────────────────────────────

const FILE_EXT: &str = "dat";

/// One file per key under `root`. Writes go to a staging file and are renamed
/// into place, so a crash never leaves a half-written value.
#[derive(Debug)]
pub struct FileKv {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKv {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{FILE_EXT}"))
    }
}

impl KvBackend for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        let dest = self.path_for(key);
        let staging = self.root.join(format!(".{key}.{FILE_EXT}.tmp"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &dest)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(&format!(".{FILE_EXT}")) {
                if key.starts_with(prefix) {
                    out.push(key.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(kv: &dyn KvBackend) {
        assert_eq!(kv.get("note_a").unwrap(), None);
        kv.put("note_a", "one").unwrap();
        kv.put("note_b", "two").unwrap();
        kv.put("task_a", "three").unwrap();
        assert_eq!(kv.get("note_a").unwrap().as_deref(), Some("one"));
        kv.put("note_a", "uno").unwrap();
        assert_eq!(kv.get("note_a").unwrap().as_deref(), Some("uno"));
        assert_eq!(kv.keys("note_").unwrap(), vec!["note_a", "note_b"]);
        assert_eq!(kv.keys("").unwrap().len(), 3);
        kv.delete("note_a").unwrap();
        kv.delete("note_a").unwrap();
        assert_eq!(kv.get("note_a").unwrap(), None);
    }

    #[test]
    fn memory_backend_semantics() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn file_backend_semantics() {
        let dir = tempdir().unwrap();
        exercise(&FileKv::open(dir.path()).unwrap());
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempdir().unwrap();
        FileKv::open(dir.path()).unwrap().put("credential", "{}").unwrap();
        let reopened = FileKv::open(dir.path()).unwrap();
        assert_eq!(reopened.get("credential").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn path_like_keys_rejected() {
        let kv = MemoryKv::new();
        assert!(matches!(kv.put("../etc", "x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(kv.get(""), Err(StoreError::InvalidKey(_))));
    }
}
