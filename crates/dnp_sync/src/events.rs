//! Events emitted upward to whatever renders the session (UI, CLI).

use dnp_proto::{Record, RecordKind};

use crate::status::SyncStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged { status: SyncStatus, peer_count: usize },
    RecordChanged { kind: RecordKind, record: Record },
    RecordDeleted { kind: RecordKind, id: String },
    /// An inbound envelope was dropped. Diagnostic only.
    CorruptEnvelope { id: String, reason: String },
    /// A queued envelope hit the alert threshold. Raised once per envelope.
    DeliveryStalled { id: String, attempts: u32 },
}

impl SessionEvent {
    /// `RecordChanged` for live records, `RecordDeleted` for tombstones.
    pub fn for_record(record: &Record) -> Self {
        if record.tombstoned {
            SessionEvent::RecordDeleted {
                kind: record.kind,
                id: record.id.clone(),
            }
        } else {
            SessionEvent::RecordChanged {
                kind: record.kind,
                record: record.clone(),
            }
        }
    }
}
