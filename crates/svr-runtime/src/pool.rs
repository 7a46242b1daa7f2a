//! Backend node-pool allocation and readiness.
//!
//! The allocator never launches processes itself: it drives a
//! [`NodeLauncher`] supplied by the embedding application (an external
//! process/image launcher), then counts boot handshakes until every
//! requested node has registered a reachable [`NodeId`].

use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{error, info};

use svr_types::NodeId;

use crate::error::{Result, RuntimeError};

// ── Launcher boundary ─────────────────────────────────────────────────────────

/// External process/image launcher consumed by the allocator.
///
/// `launch` must either start all `count` nodes running `image` or fail —
/// a partial pool is never used.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    async fn launch(&self, image: &str, count: usize) -> Result<()>;
}

// ── Pool allocator ────────────────────────────────────────────────────────────

/// Pool teardown while waiters were still parked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("node pool torn down before all nodes registered")]
struct PoolTornDown;

struct PoolInner {
    expected: usize,
    nids: Vec<NodeId>,
    resolved: bool,
    ready_tx: Option<oneshot::Sender<()>>,
}

/// Provisions a fixed number of backend nodes and exposes readiness as an
/// asynchronous signal.
///
/// Node ordering is stable: [`PoolAllocator::nid_at`] returns the same
/// handle for the same index for the whole run.
pub struct PoolAllocator {
    inner: Mutex<PoolInner>,
    ready: Shared<BoxFuture<'static, std::result::Result<(), PoolTornDown>>>,
}

impl PoolAllocator {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel::<()>();
        let ready = rx.map(|r| r.map_err(|_| PoolTornDown)).boxed().shared();
        Self {
            inner: Mutex::new(PoolInner {
                expected: 0,
                nids: Vec::new(),
                resolved: false,
                ready_tx: Some(tx),
            }),
            ready,
        }
    }

    /// Request `count` backend processes running `image`.
    ///
    /// Failure to start all `count` nodes is fatal to the run — it is
    /// surfaced here, before any message is exchanged, and never retried.
    pub async fn allocate_pool(
        &self,
        launcher: &dyn NodeLauncher,
        image: &str,
        count: usize,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.expected = count;
            if count == 0 {
                inner.resolved = true;
                if let Some(tx) = inner.ready_tx.take() {
                    let _ = tx.send(());
                }
            }
        }

        info!(image, count, "allocating backend pool");
        if let Err(e) = launcher.launch(image, count).await {
            error!(%e, "pool allocation failed");
            return Err(RuntimeError::Provisioning(e.to_string()));
        }
        Ok(())
    }

    /// Record one node's boot handshake. When the last expected node
    /// registers, the pool future resolves.
    pub fn register_node(&self, nid: NodeId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.resolved {
            return Err(RuntimeError::Provisioning(format!(
                "{nid} registered after the pool resolved"
            )));
        }
        if inner.nids.contains(&nid) {
            return Err(RuntimeError::Provisioning(format!(
                "{nid} registered twice"
            )));
        }
        inner.nids.push(nid);
        info!(%nid, registered = inner.nids.len(), expected = inner.expected, "node registered");

        if inner.nids.len() == inner.expected {
            inner.resolved = true;
            if let Some(tx) = inner.ready_tx.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    /// Resolves once all requested nodes have completed their boot
    /// handshake — never earlier. May be awaited from any number of tasks.
    pub async fn wait_pool(&self) -> Result<()> {
        self.ready
            .clone()
            .await
            .map_err(|e| RuntimeError::Provisioning(e.to_string()))
    }

    /// Handle of the `index`-th node. Guarded: calling before the pool
    /// future has resolved is an error, not undefined behavior.
    pub fn nid_at(&self, index: usize) -> Result<NodeId> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.resolved {
            return Err(RuntimeError::PoolNotReady);
        }
        inner
            .nids
            .get(index)
            .copied()
            .ok_or(RuntimeError::NodeIndexOutOfRange {
                index,
                count: inner.nids.len(),
            })
    }

    /// All node handles, in stable pool order.
    pub fn nodes(&self) -> Result<Vec<NodeId>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.resolved {
            return Err(RuntimeError::PoolNotReady);
        }
        Ok(inner.nids.clone())
    }

    /// Number of nodes requested for the pool, known as soon as
    /// `allocate_pool` has run — before any handshake arrives.
    pub fn node_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .expected
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
