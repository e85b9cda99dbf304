use serde::{Deserialize, Serialize};

/// Status exposed to the UI / CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Offline,
    Online,
    Syncing,
}

impl SyncStatus {
    /// Offline with no peers, Syncing while anything is queued, otherwise Online.
    pub fn derive(peer_count: usize, queue_length: usize) -> Self {
        if peer_count == 0 {
            SyncStatus::Offline
        } else if queue_length > 0 {
            SyncStatus::Syncing
        } else {
            SyncStatus::Online
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Online => "online",
            SyncStatus::Syncing => "syncing",
        };
        f.write_str(s)
    }
}

/// Connection to the relay. `Syncing` only while a batch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: SyncStatus,
    pub peer_count: usize,
    pub queue_length: usize,
    pub connection: ConnectionState,
}
