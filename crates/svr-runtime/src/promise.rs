//! Completion tracking for in-flight distributed calls.
//!
//! Every outbound distributed call allocates a [`RequestId`] and a pending
//! entry; the inbound reply fulfills it exactly once. The map has its own
//! lock, distinct from any per-object state lock — fulfillment arrives from
//! the dispatch context while the issuing task awaits elsewhere.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use svr_types::RequestId;

use crate::error::{Result, RuntimeError};

// ── Completion handle ─────────────────────────────────────────────────────────

/// Caller-side handle for one pending request. Holding it costs nothing —
/// no polling happens until `wait` is awaited.
pub struct Completion<T> {
    id: RequestId,
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Resolve to the fulfilled value. Errors if the map was dropped while
    /// the request was still pending.
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| RuntimeError::CompletionDropped(self.id))
    }
}

// ── Promise map ───────────────────────────────────────────────────────────────

struct Inner<T> {
    next_id: u32,
    pending: HashMap<RequestId, oneshot::Sender<T>>,
}

/// Map from in-flight [`RequestId`] to its pending completion.
///
/// Invariants: at most one live entry per id; each entry is consumed at most
/// once; entry memory is released immediately on fulfillment.
pub struct PromiseMap<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> PromiseMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Allocate a fresh request id, insert a pending entry, and return the
    /// id together with the future the caller awaits.
    pub fn new_request(&self) -> (RequestId, Completion<T>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // The counter wraps; skip any id still in flight.
        let mut id = RequestId(inner.next_id);
        while inner.pending.contains_key(&id) {
            id = RequestId(id.0.wrapping_add(1));
        }
        inner.next_id = id.0.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        (id, Completion { id, rx })
    }

    /// Deliver `value` to the caller awaiting `id`, consuming the entry.
    ///
    /// Fulfilling an unknown or already-fulfilled id is an error — a second
    /// fulfillment must never silently overwrite the first.
    pub fn fulfill(&self, id: RequestId, value: T) -> Result<()> {
        let tx = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .pending
                .remove(&id)
                .ok_or(RuntimeError::UnknownRequest(id))?
        };
        // The caller may have abandoned the completion; the entry is still
        // consumed exactly once either way.
        let _ = tx.send(value);
        Ok(())
    }

    /// Number of live (in-flight) entries.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }
}

impl<T> Default for PromiseMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
