//! Frame delivery between nodes.
//!
//! [`Transport`] is the narrow seam the engine sends through. The only
//! implementation in this crate is [`LocalRouter`], an in-process loopback
//! over per-node mpsc channels; real network transports live with the
//! embedding application, next to its process launcher.
//!
//! Delivery is FIFO per (sender, destination) pair — the ordering the phase
//! sequence relies on to apply parameters before coefficient-init requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use svr_types::{EbbId, NodeId};

use crate::error::{Result, RuntimeError};

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One inbound delivery: who sent it, which object it addresses, and the
/// raw `[tag][payload]` frame.
#[derive(Debug)]
pub struct Envelope {
    pub src: NodeId,
    pub ebb: EbbId,
    pub frame: Vec<u8>,
}

// ── Transport seam ────────────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send + Sync {
    /// The node this endpoint sends as.
    fn local_node(&self) -> NodeId;

    /// Deliver `frame` to object `ebb` on node `dst`.
    async fn send(&self, dst: NodeId, ebb: EbbId, frame: Vec<u8>) -> Result<()>;
}

// ── Local router ──────────────────────────────────────────────────────────────

struct RouterInner {
    next_node: u32,
    inboxes: HashMap<NodeId, mpsc::Sender<Envelope>>,
}

/// In-process message router: every attached endpoint gets a [`NodeId`] and
/// an inbox receiver to drain into its dispatcher.
pub struct LocalRouter {
    capacity: usize,
    inner: Mutex<RouterInner>,
}

impl LocalRouter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            inner: Mutex::new(RouterInner {
                next_node: 0,
                inboxes: HashMap::new(),
            }),
        })
    }

    /// Attach a new node. Ids are issued in attach order, starting at 0
    /// (the front end attaches first by convention).
    pub fn attach(self: &Arc<Self>) -> (LocalEndpoint, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let node = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let node = NodeId(inner.next_node);
            inner.next_node += 1;
            inner.inboxes.insert(node, tx);
            node
        };
        (
            LocalEndpoint {
                node,
                router: Arc::clone(self),
            },
            rx,
        )
    }

    /// Drop a node's inbox; subsequent sends to it fail as unreachable.
    pub fn detach(&self, node: NodeId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.inboxes.remove(&node);
    }

    fn sender_for(&self, dst: NodeId) -> Result<mpsc::Sender<Envelope>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .inboxes
            .get(&dst)
            .cloned()
            .ok_or(RuntimeError::Unreachable(dst))
    }
}

/// Sending half for one attached node.
#[derive(Clone)]
pub struct LocalEndpoint {
    node: NodeId,
    router: Arc<LocalRouter>,
}

#[async_trait]
impl Transport for LocalEndpoint {
    fn local_node(&self) -> NodeId {
        self.node
    }

    async fn send(&self, dst: NodeId, ebb: EbbId, frame: Vec<u8>) -> Result<()> {
        // Clone the sender out of the lock before awaiting.
        let tx = self.router.sender_for(dst)?;
        tx.send(Envelope {
            src: self.node,
            ebb,
            frame,
        })
        .await
        .map_err(|_| RuntimeError::Unreachable(dst))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let router = LocalRouter::new(16);
        let (a, _rx_a) = router.attach();
        let (b, mut rx_b) = router.attach();
        assert_eq!(a.local_node(), NodeId(0));
        assert_eq!(b.local_node(), NodeId(1));

        for i in 0..4u8 {
            a.send(b.local_node(), EbbId(1), vec![i]).await.unwrap();
        }
        for i in 0..4u8 {
            let env = rx_b.recv().await.unwrap();
            assert_eq!(env.src, NodeId(0));
            assert_eq!(env.ebb, EbbId(1));
            assert_eq!(env.frame, vec![i]);
        }
    }

    #[tokio::test]
    async fn unknown_destination_is_unreachable() {
        let router = LocalRouter::new(4);
        let (a, _rx) = router.attach();
        let err = a.send(NodeId(9), EbbId(1), vec![]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unreachable(NodeId(9))));
    }

    #[tokio::test]
    async fn detached_node_becomes_unreachable() {
        let router = LocalRouter::new(4);
        let (a, _rx_a) = router.attach();
        let (b, rx_b) = router.attach();
        drop(rx_b);
        router.detach(b.local_node());
        assert!(a.send(b.local_node(), EbbId(1), vec![]).await.is_err());
    }
}
