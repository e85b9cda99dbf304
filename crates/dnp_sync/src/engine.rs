//! SyncEngine: replica index, delivery queue, inbound resolution.
//!
//! # Serialization
//! Every state change (local mutation, inbound application, queue ack) runs
//! while holding the write lane. Callers outside the engine take it with
//! [`SyncEngine::lane`] and pass the guard to the `*_record` methods as proof.
//! Lock order is lane, then the caller's collection, then engine state. The
//! engine state lock is never held across a sink call, a store write, or an
//! `.await`.
//!
//! # Delivery
//! Snapshot the queue under the lane, send outside it (each send bounded by
//! `send_timeout`), then acknowledge under the lane. An entry is removed only
//! if the queued envelope is still the one that was sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dnp_proto::record::{tombstone_key, TOMBSTONE_PREFIX};
use dnp_proto::{Record, RecordKind, Stamper, WireEnvelope};
use dnp_store::{EncryptedStore, StoreError};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::SessionEvent;
use crate::queue::{SyncQueue, SyncQueueEntry, QUEUE_KEY};
use crate::resolve::{resolve, IgnoreReason, Resolution};
use crate::status::{ConnectionState, StatusReport, SyncStatus};
use crate::transport::{Transport, TransportEvent};

pub type LaneGuard<'a> = MutexGuard<'a, ()>;

const EVENT_CAPACITY: usize = 256;

/// Receives resolved records for one kind. Called with the lane held.
pub trait RecordSink: Send + Sync {
    /// Insert, update, or (for tombstones) remove. Must not republish.
    fn apply_remote(&self, lane: &LaneGuard<'_>, record: &Record) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Inserted,
    Replaced,
    Merged,
    Ignored(IgnoreReason),
    Rejected,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    pub remaining: usize,
}

struct EngineState {
    replica: HashMap<String, Record>,
    queue: SyncQueue,
    connection: ConnectionState,
    peer_count: usize,
    last_reported: Option<(SyncStatus, usize)>,
}

pub struct SyncEngine {
    store: EncryptedStore,
    transport: Arc<dyn Transport>,
    stamper: Arc<Stamper>,
    config: SyncConfig,
    lane: Mutex<()>,
    state: Mutex<EngineState>,
    sinks: RwLock<HashMap<RecordKind, Weak<dyn RecordSink>>>,
    events: broadcast::Sender<SessionEvent>,
    flushing: AtomicBool,
    closed: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: EncryptedStore,
        transport: Arc<dyn Transport>,
        stamper: Arc<Stamper>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            store,
            transport,
            stamper,
            config,
            lane: Mutex::new(()),
            state: Mutex::new(EngineState {
                replica: HashMap::new(),
                queue: SyncQueue::default(),
                connection: ConnectionState::Disconnected,
                peer_count: 0,
                last_reported: None,
            }),
            sinks: RwLock::new(HashMap::new()),
            events,
            flushing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn lane(&self) -> LaneGuard<'_> {
        self.lane.lock()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stamper(&self) -> &Arc<Stamper> {
        &self.stamper
    }

    pub fn store(&self) -> &EncryptedStore {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Held weakly: the sink usually owns an `Arc` to this engine.
    pub fn register_sink(&self, kind: RecordKind, sink: Weak<dyn RecordSink>) {
        self.sinks.write().insert(kind, sink);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Loading ──────────────────────────────────────────────────────────────

    /// Load persisted tombstones and the pending queue. Returns the tombstone count.
    pub fn load(&self, _lane: &LaneGuard<'_>) -> Result<usize, SyncError> {
        let mut tombstones = Vec::new();
        for key in self.store.keys(TOMBSTONE_PREFIX)? {
            match self.store.get::<Record>(&key) {
                Ok(Some(rec)) if rec.tombstoned => tombstones.push(rec),
                Ok(_) => {}
                Err(StoreError::NoActiveKey) => return Err(StoreError::NoActiveKey.into()),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable tombstone"),
            }
        }
        let entries = match self.store.get::<Vec<SyncQueueEntry>>(QUEUE_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(StoreError::NoActiveKey) => return Err(StoreError::NoActiveKey.into()),
            Err(e) => {
                warn!(error = %e, "pending queue unreadable, starting empty");
                Vec::new()
            }
        };

        let count = tombstones.len();
        let mut st = self.state.lock();
        for rec in tombstones {
            self.stamper.observe(rec.modified_at);
            st.replica.insert(rec.id.clone(), rec);
        }
        st.queue = SyncQueue::from_entries(entries);
        info!(tombstones = count, queued = st.queue.len(), "sync state loaded");
        Ok(count)
    }

    /// Register a record read from local storage. Returns `false` if a newer
    /// version (e.g. a tombstone) is already known.
    pub fn index_record(&self, _lane: &LaneGuard<'_>, record: &Record) -> bool {
        let mut st = self.state.lock();
        if let Some(existing) = st.replica.get(&record.id) {
            if existing.modified_at >= record.modified_at {
                return false;
            }
        }
        self.stamper.observe(record.modified_at);
        st.replica.insert(record.id.clone(), record.clone());
        true
    }

    pub fn replica_get(&self, id: &str) -> Option<Record> {
        self.state.lock().replica.get(id).cloned()
    }

    pub fn tombstone_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .replica
            .values()
            .filter(|r| r.tombstoned)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn queue_entries(&self) -> Vec<SyncQueueEntry> {
        self.state.lock().queue.to_entries()
    }

    // ── Local mutations ──────────────────────────────────────────────────────

    /// Seal, index, and queue a locally changed record. Delivery happens on the next flush.
    pub fn publish_record(&self, _lane: &LaneGuard<'_>, record: &Record) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let envelope = self.store.seal_envelope(record)?;
        let was_tombstoned = self
            .replica_get(&record.id)
            .map(|r| r.tombstoned)
            .unwrap_or(false);
        if was_tombstoned && !record.tombstoned {
            self.store.delete(&tombstone_key(&record.id))?;
        }
        let entries = {
            let mut st = self.state.lock();
            st.replica.insert(record.id.clone(), record.clone());
            st.queue.push(envelope);
            st.queue.to_entries()
        };
        self.persist_entries(&entries)?;
        debug!(id = %record.id, ts = record.modified_at, "record queued for delivery");
        self.refresh_status();
        Ok(())
    }

    /// Tombstone `id` with a bumped timestamp and queue it. `None` if the id is
    /// unknown, of another kind, or already deleted.
    pub fn delete_record(
        &self,
        lane: &LaneGuard<'_>,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<Record>, SyncError> {
        let base = match self.replica_get(id) {
            Some(r) if !r.tombstoned && r.kind == kind => r,
            _ => return Ok(None),
        };
        let tomb = base.tombstone(self.stamper.next(base.modified_at));
        self.store.put(&tombstone_key(id), &tomb)?;
        self.publish_record(lane, &tomb)?;
        info!(id, kind = %kind, "record tombstoned");
        Ok(Some(tomb))
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Verify, resolve, and apply one inbound envelope. Corrupt envelopes are
    /// reported and dropped, never returned as errors.
    pub fn apply_envelope(&self, envelope: &WireEnvelope) -> Result<InboundOutcome, SyncError> {
        let lane = self.lane.lock();
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let record = match self.store.open_envelope(envelope) {
            Ok(r) => r,
            Err(StoreError::CorruptEnvelope { id, reason }) => {
                warn!(id = %id, reason = %reason, "dropping corrupt envelope");
                self.emit(SessionEvent::CorruptEnvelope { id, reason });
                return Ok(InboundOutcome::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        let local = self.replica_get(&record.id);
        let resolution = resolve(local.as_ref(), record).map_err(StoreError::from)?;
        match resolution {
            Resolution::Ignore(reason) => {
                debug!(id = %envelope.id, ?reason, "inbound envelope ignored");
                Ok(InboundOutcome::Ignored(reason))
            }
            Resolution::Insert(r) => {
                self.install(&lane, &r, false)?;
                Ok(InboundOutcome::Inserted)
            }
            Resolution::Replace(r) => {
                self.install(&lane, &r, false)?;
                Ok(InboundOutcome::Replaced)
            }
            Resolution::Merge(mut r) => {
                r.modified_at = self.stamper.next(r.modified_at);
                info!(id = %r.id, ts = r.modified_at, "equal-timestamp conflict merged");
                self.install(&lane, &r, true)?;
                Ok(InboundOutcome::Merged)
            }
        }
    }

    /// `apply_envelope`, then push any merge result out.
    pub async fn receive(&self, envelope: WireEnvelope) -> Result<InboundOutcome, SyncError> {
        let outcome = self.apply_envelope(&envelope)?;
        if outcome == InboundOutcome::Merged {
            self.flush().await;
        }
        Ok(outcome)
    }

    fn install(&self, lane: &LaneGuard<'_>, record: &Record, republish: bool) -> Result<(), SyncError> {
        self.stamper.observe(record.modified_at);
        if record.tombstoned {
            self.store.put(&tombstone_key(&record.id), record)?;
        } else {
            self.store.delete(&tombstone_key(&record.id))?;
        }

        let discarded = {
            let mut st = self.state.lock();
            st.replica.insert(record.id.clone(), record.clone());
            st.queue.discard_older(&record.id, record.modified_at)
        };

        let sink = self.sinks.read().get(&record.kind).and_then(Weak::upgrade);
        match sink {
            Some(sink) => sink.apply_remote(lane, record)?,
            None => warn!(kind = %record.kind, "no sink registered for record kind"),
        }

        if republish {
            self.publish_record(lane, record)?;
        } else if discarded {
            let entries = self.state.lock().queue.to_entries();
            self.persist_entries(&entries)?;
            self.refresh_status();
        }
        self.emit(SessionEvent::for_record(record));
        Ok(())
    }

    // ── Delivery ─────────────────────────────────────────────────────────────

    /// Try to deliver everything queued.
    pub async fn flush(&self) -> FlushReport {
        self.deliver(None).await
    }

    /// Deliver entries whose last attempt is older than `retry_interval`.
    pub async fn retry_due(&self) -> FlushReport {
        let cutoff = self.stamper.now_ms() - self.config.retry_interval_ms as i64;
        self.deliver(Some(cutoff)).await
    }

    async fn deliver(&self, due_before: Option<i64>) -> FlushReport {
        if self.is_closed() {
            return FlushReport::default();
        }
        self.refresh_peers();
        if self.status().peer_count == 0 {
            self.refresh_status();
            return FlushReport {
                remaining: self.queue_len(),
                ..FlushReport::default()
            };
        }
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushReport {
                remaining: self.queue_len(),
                ..FlushReport::default()
            };
        }

        let batch = self.snapshot(due_before);
        let mut report = FlushReport::default();
        if !batch.is_empty() {
            self.set_connection_if(ConnectionState::Connected, ConnectionState::Syncing);
            for envelope in &batch {
                let sent = match tokio::time::timeout(
                    self.config.send_timeout(),
                    self.transport.send(envelope),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(self.config.send_timeout_ms)),
                };
                match sent {
                    Ok(()) => {
                        report.sent += 1;
                        self.acknowledge(envelope);
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(id = %envelope.id, error = %e, "delivery failed, will retry");
                        self.note_failure(envelope);
                    }
                }
            }
            self.set_connection_if(ConnectionState::Syncing, ConnectionState::Connected);
        }
        self.flushing.store(false, Ordering::Release);

        report.remaining = self.queue_len();
        if report.sent + report.failed > 0 {
            debug!(sent = report.sent, failed = report.failed, remaining = report.remaining, "flush finished");
        }
        self.refresh_status();
        report
    }

    fn snapshot(&self, due_before: Option<i64>) -> Vec<WireEnvelope> {
        let _lane = self.lane.lock();
        self.state.lock().queue.snapshot(due_before)
    }

    fn acknowledge(&self, sent: &WireEnvelope) {
        let _lane = self.lane.lock();
        let entries = {
            let mut st = self.state.lock();
            if !st.queue.ack(sent) {
                return;
            }
            st.queue.to_entries()
        };
        if let Err(e) = self.persist_entries(&entries) {
            warn!(error = %e, "could not persist queue after ack");
        }
    }

    fn note_failure(&self, sent: &WireEnvelope) {
        let _lane = self.lane.lock();
        let now = self.stamper.now_ms();
        let (alert, entries) = {
            let mut st = self.state.lock();
            let alert = st
                .queue
                .record_failure(sent, now, self.config.delivery_alert_threshold);
            (alert, st.queue.to_entries())
        };
        if let Some(attempts) = alert {
            warn!(id = %sent.id, attempts, "delivery stalled");
            self.emit(SessionEvent::DeliveryStalled {
                id: sent.id.clone(),
                attempts,
            });
        }
        if let Err(e) = self.persist_entries(&entries) {
            warn!(error = %e, "could not persist queue after failed delivery");
        }
    }

    fn persist_entries(&self, entries: &[SyncQueueEntry]) -> Result<(), SyncError> {
        self.store.put(QUEUE_KEY, entries)?;
        Ok(())
    }

    fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    // ── Connectivity & status ────────────────────────────────────────────────

    pub async fn connect(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.state.lock().connection = ConnectionState::Connecting;
        let result = match tokio::time::timeout(self.config.send_timeout(), self.transport.connect())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.config.send_timeout_ms)),
        };
        match &result {
            Ok(()) => {
                self.state.lock().connection = ConnectionState::Connected;
                info!("transport connected");
            }
            Err(e) => {
                self.state.lock().connection = ConnectionState::Disconnected;
                warn!(error = %e, "transport connect failed, staying offline");
            }
        }
        self.refresh_peers();
        self.refresh_status();
        result
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerUp(peer) => {
                info!(peer = %peer.peer_id, "peer connected");
                self.refresh_peers();
                self.refresh_status();
                self.flush().await;
            }
            TransportEvent::PeerDown(peer) => {
                info!(peer = %peer, "peer disconnected");
                self.refresh_peers();
                self.refresh_status();
            }
            TransportEvent::Envelope { from, envelope } => {
                let id = envelope.id.clone();
                match self.receive(envelope).await {
                    Ok(outcome) => debug!(from = %from, id = %id, ?outcome, "inbound envelope handled"),
                    Err(e) => warn!(from = %from, id = %id, error = %e, "inbound envelope not applied"),
                }
            }
        }
    }

    /// One heartbeat: reconnect if needed, check peers, retry due deliveries.
    pub async fn tick(&self) {
        if self.is_closed() {
            return;
        }
        if self.status().connection == ConnectionState::Disconnected {
            let _ = self.connect().await;
        }
        self.refresh_peers();
        self.refresh_status();
        self.retry_due().await;
    }

    pub fn status(&self) -> StatusReport {
        let st = self.state.lock();
        StatusReport {
            status: SyncStatus::derive(st.peer_count, st.queue.len()),
            peer_count: st.peer_count,
            queue_length: st.queue.len(),
            connection: st.connection,
        }
    }

    fn refresh_peers(&self) {
        let count = if self.is_closed() {
            0
        } else {
            self.transport.peers().len()
        };
        self.state.lock().peer_count = count;
    }

    fn set_connection_if(&self, from: ConnectionState, to: ConnectionState) {
        let mut st = self.state.lock();
        if st.connection == from {
            st.connection = to;
        }
    }

    fn refresh_status(&self) {
        let changed = {
            let mut st = self.state.lock();
            let current = (SyncStatus::derive(st.peer_count, st.queue.len()), st.peer_count);
            if st.last_reported == Some(current) {
                None
            } else {
                st.last_reported = Some(current);
                Some(current)
            }
        };
        if let Some((status, peer_count)) = changed {
            debug!(%status, peer_count, "sync status changed");
            self.emit(SessionEvent::StatusChanged { status, peer_count });
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Persist the queue and mark the engine closed without touching the
    /// network. Returns `false` if it was already closed.
    pub fn shut_down(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let entries = {
            let _lane = self.lane.lock();
            self.state.lock().queue.to_entries()
        };
        if let Err(e) = self.persist_entries(&entries) {
            warn!(error = %e, "could not persist queue on close");
        }
        {
            let mut st = self.state.lock();
            st.connection = ConnectionState::Disconnected;
            st.peer_count = 0;
        }
        self.refresh_status();
        true
    }

    /// [`SyncEngine::shut_down`], then leave the network. Idempotent.
    pub async fn close(&self) {
        if !self.shut_down() {
            return;
        }
        if tokio::time::timeout(self.config.send_timeout(), self.transport.disconnect())
            .await
            .is_err()
        {
            warn!(timeout_ms = self.config.send_timeout_ms, "transport disconnect timed out");
        }
        info!("sync engine closed");
    }
}
