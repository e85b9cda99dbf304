use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Period of the background flush / connectivity check.
    pub heartbeat_interval_ms: u64,
    /// Minimum gap between periodic retries of one queued envelope.
    pub retry_interval_ms: u64,
    /// Upper bound on a single send.
    pub send_timeout_ms: u64,
    /// Failed attempts after which a `DeliveryStalled` event is raised once.
    pub delivery_alert_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            retry_interval_ms: 30_000,
            send_timeout_ms: 10_000,
            delivery_alert_threshold: 10,
        }
    }
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }
}
