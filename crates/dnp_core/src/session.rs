//! Session: one unlocked account, its records, and its sync engine.
//!
//! A session owns the active key for its whole life. Opening it loads the
//! persisted records, tombstones, and pending queue, connects the transport,
//! and starts the heartbeat. Closing it stops the heartbeat, persists the
//! queue, disconnects, and discards the key, once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use dnp_crypto::RecoveryPhrase;
use dnp_proto::{Record, Stamper, SystemClock};
use dnp_store::{
    load_credential, save_credential, EncryptedStore, KeyManager, KeyVault, KvBackend,
    NewCredential, StorageInfo, StoreError, UserCredential,
};
use dnp_sync::{
    spawn_heartbeat_loop, FlushReport, HeartbeatHandle, SessionEvent, StatusReport, SyncEngine,
    Transport,
};

use crate::bundle::{Bundle, ImportOutcome, ImportReport};
use crate::config::NotepadConfig;
use crate::error::CoreError;
use crate::notes::NoteManager;
use crate::records::{RecordBody, RecordManager};
use crate::tasks::TaskManager;

pub struct Session {
    config: NotepadConfig,
    backend: Arc<dyn KvBackend>,
    keys: KeyManager,
    credential: Mutex<UserCredential>,
    engine: Arc<SyncEngine>,
    notes: Arc<NoteManager>,
    tasks: Arc<TaskManager>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    closed: AtomicBool,
}

impl Session {
    pub fn has_credential(backend: &dyn KvBackend) -> Result<bool, CoreError> {
        Ok(load_credential(backend)?.is_some())
    }

    /// First run: issue a credential and open a session on it. The returned
    /// phrase is the only time the caller gets it without the passphrase.
    pub async fn create(
        backend: Arc<dyn KvBackend>,
        transport: Arc<dyn Transport>,
        config: NotepadConfig,
        passphrase: &str,
    ) -> Result<(Self, RecoveryPhrase), CoreError> {
        config.validate()?;
        if load_credential(backend.as_ref())?.is_some() {
            return Err(StoreError::CredentialExists.into());
        }
        let keys = key_manager(&config);
        let NewCredential {
            credential,
            recovery_phrase,
        } = keys.create_credential(passphrase)?;
        save_credential(backend.as_ref(), &credential)?;
        info!("credential created");
        let session = Self::start(backend, transport, config, keys, credential).await?;
        Ok((session, recovery_phrase))
    }

    pub async fn open(
        backend: Arc<dyn KvBackend>,
        transport: Arc<dyn Transport>,
        config: NotepadConfig,
        passphrase: &str,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let credential = load_credential(backend.as_ref())?.ok_or(StoreError::NoCredential)?;
        let keys = key_manager(&config);
        keys.unlock(passphrase, &credential)?;
        Self::start(backend, transport, config, keys, credential).await
    }

    /// Rebind the account to `new_passphrase` with the recovery phrase, then open.
    pub async fn recover(
        backend: Arc<dyn KvBackend>,
        transport: Arc<dyn Transport>,
        config: NotepadConfig,
        phrase: &str,
        new_passphrase: &str,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let credential = load_credential(backend.as_ref())?.ok_or(StoreError::NoCredential)?;
        let keys = key_manager(&config);
        let fresh = keys.recover(phrase, new_passphrase, &credential)?;
        save_credential(backend.as_ref(), &fresh)?;
        Self::start(backend, transport, config, keys, fresh).await
    }

    async fn start(
        backend: Arc<dyn KvBackend>,
        transport: Arc<dyn Transport>,
        config: NotepadConfig,
        keys: KeyManager,
        credential: UserCredential,
    ) -> Result<Self, CoreError> {
        let store = EncryptedStore::new(backend.clone(), keys.vault().clone());
        let stamper = Arc::new(Stamper::new(Arc::new(SystemClock)));
        let engine = SyncEngine::new(store, transport.clone(), stamper, config.sync.clone());
        let notes = NoteManager::new(engine.clone());
        let tasks = TaskManager::new(engine.clone());
        {
            let lane = engine.lane();
            engine.load(&lane)?;
            notes.load(&lane)?;
            tasks.load(&lane)?;
        }

        let inbound = transport.subscribe();
        if let Err(e) = engine.connect().await {
            warn!(error = %e, "starting offline");
        }
        let heartbeat = spawn_heartbeat_loop(engine.clone(), inbound);
        engine.flush().await;
        info!(notes = notes.len(), tasks = tasks.len(), "session opened");

        Ok(Self {
            config,
            backend,
            keys,
            credential: Mutex::new(credential),
            engine,
            notes,
            tasks,
            heartbeat: Mutex::new(Some(heartbeat)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn notes(&self) -> &NoteManager {
        &self.notes
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn config(&self) -> &NotepadConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.engine.subscribe()
    }

    pub fn status(&self) -> StatusReport {
        self.engine.status()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.keys.is_unlocked()
    }

    /// Push everything queued now instead of waiting for the heartbeat.
    pub async fn sync_now(&self) -> FlushReport {
        self.engine.flush().await
    }

    pub fn storage_info(&self) -> Result<StorageInfo, CoreError> {
        Ok(self.engine.store().storage_info()?)
    }

    pub fn credential(&self) -> UserCredential {
        self.credential.lock().clone()
    }

    pub fn change_passphrase(&self, old: &str, new: &str) -> Result<(), CoreError> {
        let mut credential = self.credential.lock();
        let fresh = self.keys.change_passphrase(old, new, &credential)?;
        save_credential(self.backend.as_ref(), &fresh)?;
        *credential = fresh;
        Ok(())
    }

    pub fn reveal_recovery_phrase(&self, passphrase: &str) -> Result<RecoveryPhrase, CoreError> {
        let credential = self.credential.lock().clone();
        Ok(self.keys.reveal_recovery_phrase(passphrase, &credential)?)
    }

    // ── Import / export ──────────────────────────────────────────────────────

    pub fn export(&self) -> Result<Bundle, CoreError> {
        let to_values = |records: Vec<Record>| -> Result<Vec<serde_json::Value>, CoreError> {
            records
                .iter()
                .map(|r| serde_json::to_value(r).map_err(CoreError::from))
                .collect()
        };
        Ok(Bundle {
            version: crate::bundle::BUNDLE_VERSION,
            notes: to_values(self.notes.records())?,
            tasks: to_values(self.tasks.records())?,
            exported_at: Some(Utc::now()),
        })
    }

    pub async fn import(&self, bundle: &Bundle) -> Result<ImportReport, CoreError> {
        let report = {
            let lane = self.engine.lane();
            let mut report = ImportReport::default();
            import_into(&self.notes, &lane, &bundle.notes, &mut report)?;
            import_into(&self.tasks, &lane, &bundle.tasks, &mut report)?;
            report
        };
        if report.changed() > 0 {
            self.engine.flush().await;
        }
        info!(
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            rejected = report.rejected,
            "bundle imported"
        );
        Ok(report)
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Stop background work, persist the queue, disconnect, and discard the
    /// key. Returns `false` if the session was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        self.engine.close().await;
        self.keys.lock();
        info!("session closed");
        true
    }

    /// Same as [`Session::close`].
    pub async fn lock(&self) -> bool {
        self.close().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
        self.engine.shut_down();
        self.keys.lock();
        warn!("session dropped without close");
    }
}

fn key_manager(config: &NotepadConfig) -> KeyManager {
    KeyManager::new(
        Arc::new(KeyVault::new()),
        config.kdf,
        config.min_passphrase_len,
    )
}

fn import_into<B: RecordBody>(
    manager: &RecordManager<B>,
    lane: &dnp_sync::LaneGuard<'_>,
    values: &[serde_json::Value],
    report: &mut ImportReport,
) -> Result<(), CoreError> {
    for value in values {
        let outcome = match serde_json::from_value::<Record>(value.clone()) {
            Ok(record) => manager.import_record(lane, record)?,
            Err(_) => ImportOutcome::Rejected,
        };
        report.tally(outcome);
    }
    Ok(())
}
