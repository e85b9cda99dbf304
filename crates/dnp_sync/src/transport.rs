//! Transport capability and the in-memory relay used for local peers and tests.
//!
//! A transport moves opaque `WireEnvelope`s and reports peer presence. It
//! knows nothing about records, keys, or conflict resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use dnp_proto::WireEnvelope;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub peer_id: String,
    pub connected_since: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerUp(PeerConnection),
    PeerDown(String),
    Envelope { from: String, envelope: WireEnvelope },
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), SyncError>;

    /// Hand an envelope to the network. `Ok` means at least one peer accepted it.
    async fn send(&self, envelope: &WireEnvelope) -> Result<(), SyncError>;

    /// Ordered inbound event stream. A new subscription replaces the previous one.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    fn peers(&self) -> Vec<PeerConnection>;

    async fn disconnect(&self);
}

// ── In-memory relay ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Member {
    connected: bool,
    offline: bool,
    up_since: Option<DateTime<Utc>>,
    sink: Option<mpsc::UnboundedSender<TransportEvent>>,
    send_delay: Option<Duration>,
}

impl Member {
    fn reachable(&self) -> bool {
        self.connected && !self.offline
    }

    fn push(&self, event: TransportEvent) {
        if let Some(tx) = &self.sink {
            let _ = tx.send(event);
        }
    }
}

/// A broadcast hub. Every reachable member receives every envelope sent by
/// any other reachable member.
#[derive(Default)]
pub struct MemoryRelay {
    members: Mutex<HashMap<String, Member>>,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, peer_id: impl Into<String>) -> Arc<MemoryTransport> {
        let peer_id = peer_id.into();
        self.members.lock().entry(peer_id.clone()).or_default();
        Arc::new(MemoryTransport {
            relay: Arc::clone(self),
            peer_id,
        })
    }

    fn set_reachable(&self, peer_id: &str, connected: Option<bool>, offline: Option<bool>) {
        let mut members = self.members.lock();
        let was = members.get(peer_id).map(Member::reachable).unwrap_or(false);
        {
            let me = members.entry(peer_id.to_string()).or_default();
            if let Some(c) = connected {
                me.connected = c;
            }
            if let Some(o) = offline {
                me.offline = o;
            }
        }
        let now_reachable = members.get(peer_id).map(Member::reachable).unwrap_or(false);
        if was == now_reachable {
            return;
        }

        let now = Utc::now();
        let others: Vec<String> = members
            .iter()
            .filter(|(id, m)| id.as_str() != peer_id && m.reachable())
            .map(|(id, _)| id.clone())
            .collect();
        if now_reachable {
            if let Some(me) = members.get_mut(peer_id) {
                me.up_since = Some(now);
            }
            for other in &others {
                if let Some(m) = members.get(other) {
                    m.push(TransportEvent::PeerUp(PeerConnection {
                        peer_id: peer_id.to_string(),
                        connected_since: now,
                    }));
                }
                if let (Some(me), Some(m)) = (members.get(peer_id), members.get(other)) {
                    me.push(TransportEvent::PeerUp(PeerConnection {
                        peer_id: other.clone(),
                        connected_since: m.up_since.unwrap_or(now),
                    }));
                }
            }
        } else {
            if let Some(me) = members.get_mut(peer_id) {
                me.up_since = None;
            }
            for other in &others {
                if let Some(m) = members.get(other) {
                    m.push(TransportEvent::PeerDown(peer_id.to_string()));
                }
                if let Some(me) = members.get(peer_id) {
                    me.push(TransportEvent::PeerDown(other.clone()));
                }
            }
        }
    }
}

pub struct MemoryTransport {
    relay: Arc<MemoryRelay>,
    peer_id: String,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Simulate losing (or regaining) the network. While offline, sends and
    /// connects fail and nothing is received.
    pub fn set_offline(&self, offline: bool) {
        info!(peer = %self.peer_id, offline, "memory transport network toggled");
        self.relay.set_reachable(&self.peer_id, None, Some(offline));
    }

    /// Delay every send by `delay` (for timeout tests).
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        if let Some(m) = self.relay.members.lock().get_mut(&self.peer_id) {
            m.send_delay = delay;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), SyncError> {
        let offline = self
            .relay
            .members
            .lock()
            .get(&self.peer_id)
            .map(|m| m.offline)
            .unwrap_or(false);
        if offline {
            return Err(SyncError::DeliveryFailed("network unreachable".into()));
        }
        self.relay.set_reachable(&self.peer_id, Some(true), None);
        debug!(peer = %self.peer_id, "joined memory relay");
        Ok(())
    }

    async fn send(&self, envelope: &WireEnvelope) -> Result<(), SyncError> {
        let delay = self
            .relay
            .members
            .lock()
            .get(&self.peer_id)
            .and_then(|m| m.send_delay);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let members = self.relay.members.lock();
        let reachable = members
            .get(&self.peer_id)
            .map(Member::reachable)
            .unwrap_or(false);
        if !reachable {
            return Err(SyncError::DeliveryFailed("not connected to relay".into()));
        }
        let mut delivered = 0usize;
        for (id, m) in members.iter() {
            if id != &self.peer_id && m.reachable() {
                m.push(TransportEvent::Envelope {
                    from: self.peer_id.clone(),
                    envelope: envelope.clone(),
                });
                delivered += 1;
            }
        }
        if delivered == 0 {
            return Err(SyncError::DeliveryFailed("no reachable peers".into()));
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut members = self.relay.members.lock();
        let me = members.entry(self.peer_id.clone()).or_default();
        me.sink = Some(tx);
        rx
    }

    fn peers(&self) -> Vec<PeerConnection> {
        let members = self.relay.members.lock();
        let me_up = members.get(&self.peer_id).map(Member::reachable).unwrap_or(false);
        if !me_up {
            return Vec::new();
        }
        let mut peers: Vec<PeerConnection> = members
            .iter()
            .filter(|(id, m)| id.as_str() != self.peer_id && m.reachable())
            .map(|(id, m)| PeerConnection {
                peer_id: id.clone(),
                connected_since: m.up_since.unwrap_or_else(Utc::now),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    async fn disconnect(&self) {
        self.relay.set_reachable(&self.peer_id, Some(false), None);
        debug!(peer = %self.peer_id, "left memory relay");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(id: &str) -> WireEnvelope {
        WireEnvelope {
            id: id.into(),
            data: "ZGF0YQ==".into(),
            timestamp: 1,
            hash: "00".into(),
        }
    }

    #[tokio::test]
    async fn presence_events_flow_both_ways() {
        let relay = MemoryRelay::new();
        let a = relay.transport("a");
        let b = relay.transport("b");
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        a.connect().await.unwrap();
        assert!(a.peers().is_empty());
        b.connect().await.unwrap();

        assert!(matches!(a_rx.try_recv(), Ok(TransportEvent::PeerUp(p)) if p.peer_id == "b"));
        assert!(matches!(b_rx.try_recv(), Ok(TransportEvent::PeerUp(p)) if p.peer_id == "a"));
        assert_eq!(a.peers().len(), 1);

        b.disconnect().await;
        assert!(matches!(a_rx.try_recv(), Ok(TransportEvent::PeerDown(id)) if id == "b"));
        assert!(a.peers().is_empty());
    }

    #[tokio::test]
    async fn send_reaches_other_members_only() {
        let relay = MemoryRelay::new();
        let a = relay.transport("a");
        let b = relay.transport("b");
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        a.send(&env("x")).await.unwrap();
        assert!(matches!(b_rx.try_recv(), Ok(TransportEvent::Envelope { from, envelope }) if from == "a" && envelope.id == "x"));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_peers_fails() {
        let relay = MemoryRelay::new();
        let a = relay.transport("a");
        assert!(matches!(a.send(&env("x")).await, Err(SyncError::DeliveryFailed(_))));
        a.connect().await.unwrap();
        assert!(matches!(a.send(&env("x")).await, Err(SyncError::DeliveryFailed(_))));
    }

    #[tokio::test]
    async fn offline_blocks_connect_and_send() {
        let relay = MemoryRelay::new();
        let a = relay.transport("a");
        let b = relay.transport("b");
        b.connect().await.unwrap();
        a.set_offline(true);
        assert!(a.connect().await.is_err());
        a.set_offline(false);
        a.connect().await.unwrap();
        assert_eq!(a.peers().len(), 1);
        a.set_offline(true);
        assert!(a.peers().is_empty());
        assert!(b.peers().is_empty());
        assert!(a.send(&env("y")).await.is_err());
    }
}
