//! RecordManager: the CRUD surface for one record kind.
//!
//! The manager owns the in-memory set of live records for its kind. Every
//! mutation takes the engine's write lane, persists under `<kind>_<id>`,
//! publishes through the engine, and releases the lane before delivery is
//! attempted. Remote changes arrive already resolved through [`RecordSink`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use dnp_proto::{Record, RecordKind};
use dnp_store::StoreError;
use dnp_sync::{LaneGuard, RecordSink, SessionEvent, SyncEngine, SyncError};

use crate::bundle::ImportOutcome;
use crate::error::CoreError;

/// Typed payload of one record kind.
pub trait RecordBody: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    /// Canonical form, applied before every write. `now_ms` is the write's timestamp.
    fn normalize(&mut self, now_ms: i64);

    /// `needle` is already trimmed and lowercased.
    fn matches(&self, needle: &str) -> bool;

    /// Body for a copy of this record.
    fn duplicate(&self) -> Self;

    /// Listing order. Newest edit first unless the kind says otherwise.
    fn compare(a: &Item<Self>, b: &Item<Self>) -> Ordering {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// A live record with its payload decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item<B> {
    pub id: String,
    pub created_at: i64,
    pub modified_at: i64,
    #[serde(flatten)]
    pub body: B,
}

impl<B: RecordBody> Item<B> {
    pub fn from_record(record: &Record) -> Result<Self, CoreError> {
        Ok(Self {
            id: record.id.clone(),
            created_at: record.created_at,
            modified_at: record.modified_at,
            body: decode_body(&record.payload)?,
        })
    }
}

pub(crate) fn decode_body<B: DeserializeOwned>(payload: &Map<String, Value>) -> Result<B, CoreError> {
    Ok(serde_json::from_value(Value::Object(payload.clone()))?)
}

pub(crate) fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, CoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::InvalidInput(format!(
            "expected an object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub struct RecordManager<B: RecordBody> {
    engine: Arc<SyncEngine>,
    items: RwLock<HashMap<String, Record>>,
    _body: PhantomData<fn() -> B>,
}

impl<B: RecordBody> RecordManager<B> {
    /// Build the manager and register it with the engine for `B::KIND`.
    pub fn new(engine: Arc<SyncEngine>) -> Arc<Self> {
        let manager = Arc::new(Self {
            engine,
            items: RwLock::new(HashMap::new()),
            _body: PhantomData,
        });
        let weak: Weak<Self> = Arc::downgrade(&manager);
        let sink: Weak<dyn RecordSink> = weak;
        manager.engine.register_sink(B::KIND, sink);
        manager
    }

    pub fn kind(&self) -> RecordKind {
        B::KIND
    }

    /// Read every persisted record of this kind. Records already superseded
    /// by a tombstone are removed from storage instead of loaded.
    pub fn load(&self, lane: &LaneGuard<'_>) -> Result<usize, CoreError> {
        let store = self.engine.store();
        let mut loaded = HashMap::new();
        for key in store.keys(&B::KIND.key_prefix())? {
            let record = match store.get::<Record>(&key) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(StoreError::NoActiveKey) => return Err(StoreError::NoActiveKey.into()),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable record");
                    continue;
                }
            };
            if record.kind != B::KIND || record.tombstoned || record.storage_key() != key {
                warn!(key = %key, "skipping misfiled record");
                continue;
            }
            if self.engine.index_record(lane, &record) {
                loaded.insert(record.id.clone(), record);
            } else {
                debug!(id = %record.id, "stored record superseded, removing");
                store.delete(&key)?;
            }
        }
        let count = loaded.len();
        *self.items.write() = loaded;
        info!(kind = %B::KIND, count, "records loaded");
        Ok(count)
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    pub async fn create(&self, body: B) -> Result<Item<B>, CoreError> {
        let record = self.stage_create(body)?;
        self.engine.flush().await;
        Item::from_record(&record)
    }

    /// Merge `patch` into the stored payload. A `null` field removes it.
    pub async fn update<P>(&self, id: &str, patch: &P) -> Result<Item<B>, CoreError>
    where
        P: Serialize + ?Sized + Sync,
    {
        let patch = to_payload(patch)?;
        let record = self.stage_edit(id, |record| {
            record.apply_patch(&patch);
            Ok(())
        })?;
        self.engine.flush().await;
        Item::from_record(&record)
    }

    /// Edit the decoded body in place.
    pub async fn modify<F>(&self, id: &str, edit: F) -> Result<Item<B>, CoreError>
    where
        F: FnOnce(&mut B) -> Result<(), CoreError> + Send,
    {
        let record = self.stage_edit(id, |record| {
            let mut body: B = decode_body(&record.payload)?;
            edit(&mut body)?;
            record.payload.extend(to_payload(&body)?);
            Ok(())
        })?;
        self.engine.flush().await;
        Item::from_record(&record)
    }

    /// `false` if the id is not a live record of this kind.
    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        let removed = self.stage_delete(id)?;
        if removed {
            self.engine.flush().await;
        }
        Ok(removed)
    }

    pub async fn duplicate(&self, id: &str) -> Result<Item<B>, CoreError> {
        let source = self
            .get(id)
            .ok_or_else(|| CoreError::not_found(B::KIND, id))?;
        self.create(source.body.duplicate()).await
    }

    /// Delete every record matching `pred`. Returns how many went.
    pub async fn delete_where<F>(&self, pred: F) -> Result<usize, CoreError>
    where
        F: Fn(&Item<B>) -> bool + Send,
    {
        let ids: Vec<String> = self.filter(pred).into_iter().map(|item| item.id).collect();
        let mut removed = 0;
        for id in &ids {
            if self.stage_delete(id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.engine.flush().await;
        }
        Ok(removed)
    }

    fn stage_create(&self, mut body: B) -> Result<Record, CoreError> {
        let lane = self.engine.lane();
        let now = self.engine.stamper().next(0);
        body.normalize(now);
        let record = Record::new(B::KIND, to_payload(&body)?, now);
        self.persist(&lane, &record)?;
        debug!(kind = %B::KIND, id = %record.id, "record created");
        Ok(record)
    }

    fn stage_edit<F>(&self, id: &str, edit: F) -> Result<Record, CoreError>
    where
        F: FnOnce(&mut Record) -> Result<(), CoreError>,
    {
        let lane = self.engine.lane();
        let mut record = self
            .items
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(B::KIND, id))?;
        edit(&mut record)?;

        let now = self.engine.stamper().next(record.modified_at);
        let mut body: B = decode_body(&record.payload)?;
        body.normalize(now);
        record.payload.extend(to_payload(&body)?);
        record.modified_at = now;
        self.persist(&lane, &record)?;
        debug!(kind = %B::KIND, id, "record updated");
        Ok(record)
    }

    fn stage_delete(&self, id: &str) -> Result<bool, CoreError> {
        let lane = self.engine.lane();
        if !self.items.read().contains_key(id) {
            return Ok(false);
        }
        let tomb = self.engine.delete_record(&lane, B::KIND, id)?;
        self.items.write().remove(id);
        self.engine.store().delete(&B::KIND.storage_key(id))?;
        if let Some(tomb) = tomb {
            self.engine.emit(SessionEvent::for_record(&tomb));
        }
        Ok(true)
    }

    fn persist(&self, lane: &LaneGuard<'_>, record: &Record) -> Result<(), CoreError> {
        self.engine.store().put(&record.storage_key(), record)?;
        self.items.write().insert(record.id.clone(), record.clone());
        self.engine.publish_record(lane, record)?;
        self.engine.emit(SessionEvent::for_record(record));
        Ok(())
    }

    /// Apply one record from an import bundle. Newer than local state wins;
    /// anything else is skipped. The record keeps its own timestamps.
    pub(crate) fn import_record(
        &self,
        lane: &LaneGuard<'_>,
        record: Record,
    ) -> Result<ImportOutcome, CoreError> {
        if record.kind != B::KIND || record.validate().is_err() {
            return Ok(ImportOutcome::Rejected);
        }
        if decode_body::<B>(&record.payload).is_err() {
            return Ok(ImportOutcome::Rejected);
        }
        if record.tombstoned {
            return Ok(ImportOutcome::Skipped);
        }
        let outcome = match self.engine.replica_get(&record.id) {
            None => ImportOutcome::Added,
            Some(local) if record.modified_at > local.modified_at => ImportOutcome::Updated,
            Some(_) => return Ok(ImportOutcome::Skipped),
        };
        self.engine.stamper().observe(record.modified_at);
        self.persist(lane, &record)?;
        Ok(outcome)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Item<B>> {
        let record = self.items.read().get(id).cloned()?;
        self.decode(&record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn list(&self) -> Vec<Item<B>> {
        self.filter(|_| true)
    }

    /// Case-insensitive; a blank query lists everything.
    pub fn search(&self, query: &str) -> Vec<Item<B>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list();
        }
        let mut hits = self.filter(|item| item.body.matches(&needle));
        hits.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.id.cmp(&b.id)));
        hits
    }

    /// Live records matching `pred`, in listing order.
    pub fn filter<F>(&self, pred: F) -> Vec<Item<B>>
    where
        F: Fn(&Item<B>) -> bool,
    {
        let records: Vec<Record> = self.items.read().values().cloned().collect();
        let mut items: Vec<Item<B>> = records
            .iter()
            .filter_map(|r| self.decode(r))
            .filter(|item| pred(item))
            .collect();
        items.sort_by(B::compare);
        items
    }

    /// Raw records, sorted by id, for export.
    pub fn records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.items.read().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn decode(&self, record: &Record) -> Option<Item<B>> {
        match Item::from_record(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(id = %record.id, error = %e, "record payload does not decode");
                None
            }
        }
    }
}

impl<B: RecordBody> RecordSink for RecordManager<B> {
    fn apply_remote(&self, _lane: &LaneGuard<'_>, record: &Record) -> Result<(), SyncError> {
        let key = B::KIND.storage_key(&record.id);
        if record.tombstoned {
            self.items.write().remove(&record.id);
            self.engine.store().delete(&key)?;
        } else {
            self.engine.store().put(&key, record)?;
            self.items.write().insert(record.id.clone(), record.clone());
        }
        Ok(())
    }
}
