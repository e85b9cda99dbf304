//! dnp_core: the session context applications talk to.
//!
//! # Modules
//! - `session` Session: create / open / recover / close, import and export
//! - `records` RecordManager<B>: CRUD for one record kind
//! - `notes`   Note body, tags, archive, stats
//! - `tasks`   Task body, priority, completion, stats
//! - `bundle`  Plain-JSON export bundle
//! - `config`  NotepadConfig (config.json)
//! - `paths`   Data directory resolution

pub mod bundle;
pub mod config;
pub mod error;
pub mod notes;
pub mod paths;
pub mod records;
pub mod session;
pub mod tasks;

pub use bundle::{Bundle, ImportOutcome, ImportReport};
pub use config::NotepadConfig;
pub use error::CoreError;
pub use notes::{NoteBody, NoteManager, NotePatch, NoteStats};
pub use records::{Item, RecordBody, RecordManager};
pub use session::Session;
pub use tasks::{Priority, TaskBody, TaskManager, TaskPatch, TaskStats};

pub use dnp_crypto::{KdfParams, RecoveryPhrase};
pub use dnp_proto::{Record, RecordKind};
pub use dnp_store::{FileKv, KvBackend, MemoryKv, StorageInfo, StoreError};
pub use dnp_sync::{
    FlushReport, MemoryRelay, MemoryTransport, SessionEvent, StatusReport, SyncConfig,
    SyncStatus, Transport,
};
