//! dnp_sync: best-effort replication of encrypted records between peers
//!
//! # Modules
//! - `transport` Transport capability + in-memory relay
//! - `queue`     Pending-delivery queue (one entry per record id)
//! - `resolve`   Last-write-wins resolution and equal-timestamp merge
//! - `engine`    SyncEngine: replica index, publish, inbound apply, flush
//! - `heartbeat` Background loop driving the engine
//! - `status`    Offline / Online / Syncing and connection state
//! - `events`    Upward session events
//! - `config`    Timing and alert settings

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod queue;
pub mod resolve;
pub mod status;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{FlushReport, InboundOutcome, LaneGuard, RecordSink, SyncEngine};
pub use error::SyncError;
pub use events::SessionEvent;
pub use heartbeat::{spawn_heartbeat_loop, HeartbeatHandle};
pub use queue::{SyncQueue, SyncQueueEntry};
pub use resolve::{IgnoreReason, Resolution};
pub use status::{ConnectionState, StatusReport, SyncStatus};
pub use transport::{MemoryRelay, MemoryTransport, PeerConnection, Transport, TransportEvent};
