//! The shared broadcast set.

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::net::ConnectionId;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the message was queued for.
    pub delivered: usize,
    /// Peers whose queue was full; they miss this message only.
    pub dropped: usize,
    /// Peers removed because their queue was closed.
    pub evicted: usize,
}

/// Connected data peers, each with a bounded outbound queue.
#[derive(Debug)]
pub struct PeerSet {
    peers: DashMap<ConnectionId, mpsc::Sender<Utf8Bytes>>,
    queue_depth: usize,
}

impl PeerSet {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            peers: DashMap::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Add a peer. It stays in the set until the returned membership drops.
    pub fn join(self: &Arc<Self>, id: ConnectionId) -> Membership {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.peers.insert(id, tx);
        Membership {
            id,
            set: Arc::clone(self),
            outbound: rx,
        }
    }

    pub fn leave(&self, id: ConnectionId) -> bool {
        self.peers.remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queue `payload` for every peer except `from`.
    ///
    /// Stale peers are collected during the pass and removed afterwards, so
    /// the iteration never observes its own removals.
    pub fn broadcast(&self, from: ConnectionId, payload: &Utf8Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        for entry in self.peers.iter() {
            if *entry.key() == from {
                continue;
            }
            match entry.value().try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(peer_id = %entry.key(), "Peer queue full, message dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => stale.push(*entry.key()),
            }
        }

        for id in stale {
            if self.leave(id) {
                tracing::debug!(peer_id = %id, "Evicted stale peer");
                report.evicted += 1;
            }
        }
        report
    }
}

/// A peer's place in the broadcast set.
///
/// Holds the receiving end of the peer's queue; dropping it removes the peer.
#[derive(Debug)]
pub struct Membership {
    id: ConnectionId,
    set: Arc<PeerSet>,
    outbound: mpsc::Receiver<Utf8Bytes>,
}

impl Membership {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next message queued for this peer.
    pub async fn recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.recv().await
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.set.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Utf8Bytes {
        Utf8Bytes::from(text.to_string())
    }

    #[tokio::test]
    async fn sender_is_excluded() {
        let set = Arc::new(PeerSet::new(8));
        let mut a = set.join(ConnectionId::new());
        let mut b = set.join(ConnectionId::new());
        let mut c = set.join(ConnectionId::new());

        let report = set.broadcast(a.id(), &payload(r#"{"temp":25}"#));
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0, evicted: 0 });

        assert_eq!(b.recv().await.unwrap().as_str(), r#"{"temp":25}"#);
        assert_eq!(c.recv().await.unwrap().as_str(), r#"{"temp":25}"#);
        assert!(a.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn membership_drop_leaves_set() {
        let set = Arc::new(PeerSet::new(8));
        let a = set.join(ConnectionId::new());
        let id = a.id();
        assert!(set.contains(id));

        drop(a);
        assert!(!set.contains(id));
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn closed_queue_is_evicted_without_disturbing_others() {
        let set = Arc::new(PeerSet::new(8));
        let sender = set.join(ConnectionId::new());
        let mut healthy = set.join(ConnectionId::new());

        // A peer whose writer died but whose membership has not dropped yet.
        let stale_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        set.peers.insert(stale_id, tx);

        let report = set.broadcast(sender.id(), &payload("{}"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert!(!set.contains(stale_id));

        let report = set.broadcast(sender.id(), &payload(r#"{"n":2}"#));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0, evicted: 0 });
        assert_eq!(healthy.recv().await.unwrap().as_str(), "{}");
        assert_eq!(healthy.recv().await.unwrap().as_str(), r#"{"n":2}"#);
    }

    #[tokio::test]
    async fn full_queue_drops_only_for_that_peer() {
        let set = Arc::new(PeerSet::new(1));
        let sender = set.join(ConnectionId::new());
        let mut slow = set.join(ConnectionId::new());

        assert_eq!(set.broadcast(sender.id(), &payload("{\"n\":1}")).delivered, 1);
        let report = set.broadcast(sender.id(), &payload("{\"n\":2}"));
        assert_eq!(report, BroadcastReport { delivered: 0, dropped: 1, evicted: 0 });
        assert!(set.contains(slow.id()));

        assert_eq!(slow.recv().await.unwrap().as_str(), "{\"n\":1}");
    }
}
