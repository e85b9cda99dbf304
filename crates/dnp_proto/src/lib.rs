//! dnp_proto: record and wire types for Decentralized Notepad
//!
//! Everything here is plain data. Encryption happens in `dnp_store`; the
//! relay and peers only ever see `WireEnvelope`.
//!
//! # Modules
//! - `record`   Record, RecordKind, storage key helpers
//! - `envelope` The sync wire envelope `{id, data, timestamp, hash}`
//! - `clock`    Wall clock abstraction and the strictly increasing stamper
//! - `error`    Decode / validation errors

pub mod clock;
pub mod envelope;
pub mod error;
pub mod record;

pub use clock::{Clock, ManualClock, Stamper, SystemClock};
pub use envelope::WireEnvelope;
pub use error::ProtoError;
pub use record::{Record, RecordKind};
