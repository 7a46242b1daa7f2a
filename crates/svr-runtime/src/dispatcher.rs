//! Inbound message demultiplexing.
//!
//! Every inbound frame begins with a fixed-width operation tag. The
//! dispatcher reads the tag, strips it, and forwards the payload bytes plus
//! the source node's handle to the handler registered for the target object.
//!
//! Protocol errors (unknown tag, unroutable object, frame shorter than the
//! tag) drop the offending message and surface a warning — they never take
//! the process down. Handlers run inline on the node's dispatch loop, so
//! per-node delivery order is also handling order; state pushed earlier is
//! always applied before a later request sees it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use svr_types::{EbbId, NodeId};
use svr_wire::{OpTag, WireError};

use crate::error::{Result, RuntimeError};
use crate::transport::Envelope;

// ── Handler seam ──────────────────────────────────────────────────────────────

/// Implemented by every addressable object that receives messages.
///
/// The handler owns the payload exclusively. Handlers run serialized per
/// node; heavy computation must be handed to a background task (responding
/// asynchronously) so the node's dispatch loop stays free.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, src: NodeId, tag: OpTag, payload: Vec<u8>) -> Result<()>;
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Routes inbound frames to per-object handlers.
pub struct MessageDispatcher {
    routes: Mutex<HashMap<EbbId, Arc<dyn MessageHandler>>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Register the handler for `id`. A second registration for the same id
    /// indicates a duplicate construction and is rejected.
    pub fn register(&self, id: EbbId, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if routes.contains_key(&id) {
            return Err(RuntimeError::DuplicateRoute(id));
        }
        routes.insert(id, handler);
        Ok(())
    }

    /// Demux one inbound envelope: parse and strip the tag, then run the
    /// target object's handler on the payload.
    pub async fn dispatch(&self, env: Envelope) -> Result<()> {
        let Envelope { src, ebb, frame } = env;

        if frame.len() < 4 {
            return Err(WireError::MissingTag.into());
        }
        let raw = u32::from_le_bytes(frame[..4].try_into().unwrap());
        let tag = OpTag::from_u32(raw).ok_or(WireError::UnknownTag(raw))?;
        let payload = frame[4..].to_vec();

        let handler = {
            let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            routes
                .get(&ebb)
                .cloned()
                .ok_or(RuntimeError::UnroutableObject(ebb))?
        };

        handler.handle(src, tag, payload).await
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────────────────

/// Drain a node's inbox into its dispatcher until the router detaches it.
/// Protocol and handler errors are logged and the offending message dropped.
pub fn run_dispatch_loop(
    dispatcher: Arc<MessageDispatcher>,
    mut rx: mpsc::Receiver<Envelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            let (src, ebb) = (env.src, env.ebb);
            if let Err(e) = dispatcher.dispatch(env).await {
                warn!(%src, %ebb, %e, "dropping message");
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use svr_wire::{encode_message, Message};
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct Recorder {
        seen: AsyncMutex<Vec<(NodeId, OpTag, usize)>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, src: NodeId, tag: OpTag, payload: Vec<u8>) -> Result<()> {
            self.seen.lock().await.push((src, tag, payload.len()));
            Ok(())
        }
    }

    fn envelope(src: u32, ebb: u32, frame: Vec<u8>) -> Envelope {
        Envelope {
            src: NodeId(src),
            ebb: EbbId(ebb),
            frame,
        }
    }

    #[tokio::test]
    async fn tag_is_stripped_before_the_handler_runs() {
        let dispatcher = MessageDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.register(EbbId(1), recorder.clone()).unwrap();

        let frame = encode_message(&Message::NodeReady).unwrap();
        dispatcher.dispatch(envelope(3, 1, frame)).await.unwrap();

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.as_slice(), &[(NodeId(3), OpTag::NodeReady, 0)]);
    }

    #[tokio::test]
    async fn unknown_tag_is_dropped_not_fatal() {
        let dispatcher = MessageDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.register(EbbId(1), recorder.clone()).unwrap();

        let mut bad = 999u32.to_le_bytes().to_vec();
        bad.extend_from_slice(&[1, 2, 3]);
        let err = dispatcher.dispatch(envelope(0, 1, bad)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Wire(WireError::UnknownTag(999))));

        // The dispatcher still routes valid messages afterwards.
        let frame = encode_message(&Message::NodeReady).unwrap();
        dispatcher.dispatch(envelope(0, 1, frame)).await.unwrap();
        assert_eq!(recorder.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unroutable_object_is_an_error() {
        let dispatcher = MessageDispatcher::new();
        let frame = encode_message(&Message::NodeReady).unwrap();
        assert!(matches!(
            dispatcher.dispatch(envelope(0, 42, frame)).await,
            Err(RuntimeError::UnroutableObject(EbbId(42)))
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let dispatcher = MessageDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.register(EbbId(1), recorder.clone()).unwrap();
        assert!(matches!(
            dispatcher.register(EbbId(1), recorder),
            Err(RuntimeError::DuplicateRoute(EbbId(1)))
        ));
    }

    #[tokio::test]
    async fn loop_drains_inbox() {
        let dispatcher = Arc::new(MessageDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        dispatcher.register(EbbId(1), recorder.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let handle = run_dispatch_loop(Arc::clone(&dispatcher), rx);

        for _ in 0..3 {
            let frame = encode_message(&Message::NodeReady).unwrap();
            tx.send(envelope(2, 1, frame)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(recorder.seen.lock().await.len(), 3);
    }
}
