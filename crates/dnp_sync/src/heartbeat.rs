use std::sync::Arc;

use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

use crate::engine::SyncEngine;
use crate::transport::TransportEvent;

/// Handle to the background loop. Dropping it does not stop the loop; call `stop`.
pub struct HeartbeatHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            debug!(error = %err, "heartbeat task ended abnormally");
        }
    }

    /// Stop without waiting, for use from `Drop`.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Drive the engine: inbound transport events in arrival order, plus a
/// periodic tick that reconnects, checks peers, and retries due deliveries.
pub fn spawn_heartbeat_loop(
    engine: Arc<SyncEngine>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) -> HeartbeatHandle {
    let shutdown = Arc::new(Notify::new());
    let stop = shutdown.clone();
    let task = tokio::spawn(async move {
        let mut ticker = time::interval(engine.config().heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = ticker.tick() => engine.tick().await,
                event = events.recv(), if events_open => match event {
                    Some(event) => engine.handle_event(event).await,
                    None => {
                        events_open = false;
                        debug!("transport event stream closed");
                    }
                },
            }
        }
        debug!("heartbeat loop stopped");
    });
    HeartbeatHandle { shutdown, task }
}
