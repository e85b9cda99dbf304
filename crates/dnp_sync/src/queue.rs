//! Pending-delivery queue. At most one entry per record id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dnp_proto::WireEnvelope;

pub const QUEUE_KEY: &str = "syncqueue";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub envelope: WireEnvelope,
    pub attempts_made: u32,
    pub last_attempt_at: Option<i64>,
    #[serde(default)]
    pub alerted: bool,
}

impl SyncQueueEntry {
    fn new(envelope: WireEnvelope) -> Self {
        Self {
            envelope,
            attempts_made: 0,
            last_attempt_at: None,
            alerted: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncQueue {
    entries: BTreeMap<String, SyncQueueEntry>,
}

impl SyncQueue {
    pub fn from_entries(entries: Vec<SyncQueueEntry>) -> Self {
        let mut q = Self::default();
        for e in entries {
            match q.entries.get(&e.envelope.id) {
                Some(existing) if existing.envelope.timestamp >= e.envelope.timestamp => {}
                _ => {
                    q.entries.insert(e.envelope.id.clone(), e);
                }
            }
        }
        q
    }

    pub fn to_entries(&self) -> Vec<SyncQueueEntry> {
        self.entries.values().cloned().collect()
    }

    /// Queue `envelope`, superseding any older entry for the same id.
    /// An envelope older than the queued one is dropped. Returns whether it was queued.
    pub fn push(&mut self, envelope: WireEnvelope) -> bool {
        if let Some(existing) = self.entries.get(&envelope.id) {
            if existing.envelope.timestamp > envelope.timestamp {
                return false;
            }
        }
        self.entries
            .insert(envelope.id.clone(), SyncQueueEntry::new(envelope));
        true
    }

    /// Drop the entry for `id` if it is older than `timestamp`.
    pub fn discard_older(&mut self, id: &str, timestamp: i64) -> bool {
        if matches!(self.entries.get(id), Some(e) if e.envelope.timestamp < timestamp) {
            self.entries.remove(id);
            return true;
        }
        false
    }

    /// Envelopes ready to send. With `due_before`, entries attempted at or after
    /// that time are skipped.
    pub fn snapshot(&self, due_before: Option<i64>) -> Vec<WireEnvelope> {
        self.entries
            .values()
            .filter(|e| match (due_before, e.last_attempt_at) {
                (Some(cutoff), Some(last)) => last < cutoff,
                _ => true,
            })
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// Remove the entry only if it still holds exactly `sent`.
    pub fn ack(&mut self, sent: &WireEnvelope) -> bool {
        if matches!(self.entries.get(&sent.id), Some(e) if &e.envelope == sent) {
            self.entries.remove(&sent.id);
            return true;
        }
        false
    }

    /// Count a failed attempt. Returns the attempt count the first time it
    /// reaches `alert_threshold`.
    pub fn record_failure(&mut self, sent: &WireEnvelope, now_ms: i64, alert_threshold: u32) -> Option<u32> {
        let entry = self.entries.get_mut(&sent.id)?;
        if &entry.envelope != sent {
            return None;
        }
        entry.attempts_made = entry.attempts_made.saturating_add(1);
        entry.last_attempt_at = Some(now_ms);
        if !entry.alerted && alert_threshold > 0 && entry.attempts_made >= alert_threshold {
            entry.alerted = true;
            return Some(entry.attempts_made);
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<&SyncQueueEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(id: &str, ts: i64) -> WireEnvelope {
        WireEnvelope {
            id: id.into(),
            data: format!("data-{ts}"),
            timestamp: ts,
            hash: format!("h{ts}"),
        }
    }

    #[test]
    fn newer_envelope_supersedes() {
        let mut q = SyncQueue::default();
        assert!(q.push(env("a", 1)));
        assert!(q.push(env("a", 2)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.get("a").unwrap().envelope.timestamp, 2);
        assert!(!q.push(env("a", 1)));
        assert_eq!(q.get("a").unwrap().envelope.timestamp, 2);
    }

    #[test]
    fn ack_ignores_superseded_send() {
        let mut q = SyncQueue::default();
        q.push(env("a", 1));
        let sent = q.snapshot(None).remove(0);
        q.push(env("a", 2));
        assert!(!q.ack(&sent));
        assert_eq!(q.len(), 1);
        let sent = q.snapshot(None).remove(0);
        assert!(q.ack(&sent));
        assert!(q.is_empty());
    }

    #[test]
    fn failures_alert_once() {
        let mut q = SyncQueue::default();
        let e = env("a", 1);
        q.push(e.clone());
        assert_eq!(q.record_failure(&e, 10, 3), None);
        assert_eq!(q.record_failure(&e, 20, 3), None);
        assert_eq!(q.record_failure(&e, 30, 3), Some(3));
        assert_eq!(q.record_failure(&e, 40, 3), None);
        let entry = q.get("a").unwrap();
        assert_eq!(entry.attempts_made, 4);
        assert_eq!(entry.last_attempt_at, Some(40));
    }

    #[test]
    fn snapshot_respects_retry_cutoff() {
        let mut q = SyncQueue::default();
        let a = env("a", 1);
        q.push(a.clone());
        q.push(env("b", 1));
        q.record_failure(&a, 100, 10);
        assert_eq!(q.snapshot(Some(50)).len(), 1);
        assert_eq!(q.snapshot(Some(150)).len(), 2);
        assert_eq!(q.snapshot(None).len(), 2);
    }

    #[test]
    fn discard_older_only_drops_stale() {
        let mut q = SyncQueue::default();
        q.push(env("a", 5));
        assert!(!q.discard_older("a", 5));
        assert!(q.discard_older("a", 6));
        assert!(q.is_empty());
    }

    #[test]
    fn persisted_form_roundtrips_and_dedups() {
        let restored = SyncQueue::from_entries(vec![
            SyncQueueEntry::new(env("a", 1)),
            SyncQueueEntry::new(env("a", 3)),
            SyncQueueEntry::new(env("b", 2)),
        ]);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("a").unwrap().envelope.timestamp, 3);
    }
}
