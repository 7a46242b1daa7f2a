//! Front-end reconstruction coordinator.
//!
//! Drives the run's phase sequence: provision the backend pool, wait for
//! every boot handshake, push the run context, then fan one
//! coefficient-init request out per node and merge the shares back into a
//! single slice-ordered result. Phases are strictly ordered — a phase
//! starts only after the previous one has fully completed on every node.
//!
//! Replies are correlated through [`PromiseMap`]s, which have their own
//! locks: fulfillment arrives on the dispatch path while the phase driver
//! awaits elsewhere.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use svr_runtime::{
    Completion, MessageHandler, NodeLauncher, PoolAllocator, PromiseMap, RuntimeError, Transport,
};
use svr_types::{
    EbbId, NodeId, ReconstructionParams, RigidTransform, RuntimeConfig, Slice, SliceCoefficients,
    VolumeGeometry, VolumeMask,
};
use svr_wire::{encode_message, CoeffInitRequest, CoeffShare, Message, OpTag};

use crate::coeff_init::split_ranges;
use crate::error::{EngineError, Result};

/// Well-known id of the reconstruction object; every node materializes its
/// local instance under this id.
pub const RECONSTRUCTION_EBB: EbbId = EbbId(1);

// ── Run inputs ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RunInputs {
    params: Option<ReconstructionParams>,
    slices: Vec<Slice>,
    transforms: Vec<RigidTransform>,
    volume: Option<VolumeGeometry>,
    mask: Option<VolumeMask>,
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct Reconstruction {
    id: EbbId,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    pool: Arc<PoolAllocator>,
    config: RuntimeConfig,
    inputs: Mutex<RunInputs>,
    coeff_replies: PromiseMap<CoeffShare>,
    ping_replies: PromiseMap<NodeId>,
}

impl Reconstruction {
    pub fn new(
        id: EbbId,
        transport: Arc<dyn Transport>,
        pool: Arc<PoolAllocator>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, %started_at, "reconstruction coordinator created");
        Arc::new(Self {
            id,
            run_id,
            started_at,
            transport,
            pool,
            config,
            inputs: Mutex::new(RunInputs::default()),
            coeff_replies: PromiseMap::new(),
            ping_replies: PromiseMap::new(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Node handles of the resolved pool, in stable order.
    pub fn pool_nodes(&self) -> Result<Vec<NodeId>> {
        Ok(self.pool.nodes()?)
    }

    pub fn set_parameters(&self, params: ReconstructionParams) {
        let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        inputs.params = Some(params);
    }

    /// Install the run's slice set, per-slice transforms, target volume
    /// geometry, and optional region-of-interest mask.
    pub fn set_inputs(
        &self,
        slices: Vec<Slice>,
        transforms: Vec<RigidTransform>,
        volume: VolumeGeometry,
        mask: Option<VolumeMask>,
    ) -> Result<()> {
        if transforms.len() != slices.len() {
            return Err(EngineError::TransformCountMismatch {
                count: transforms.len(),
                slices: slices.len(),
            });
        }
        let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        inputs.slices = slices;
        inputs.transforms = transforms;
        inputs.volume = Some(volume);
        inputs.mask = mask;
        Ok(())
    }

    /// Phase 1: provision `count` backend nodes running `image`.
    pub async fn allocate_backends(
        &self,
        launcher: &dyn NodeLauncher,
        image: &str,
        count: usize,
    ) -> Result<()> {
        self.pool.allocate_pool(launcher, image, count).await?;
        Ok(())
    }

    /// Phase 2: block until every provisioned node has handshaken.
    pub async fn wait_pool(&self) -> Result<()> {
        self.pool.wait_pool().await?;
        Ok(())
    }

    /// Phase 3: push the parameter snapshot and slice set to every node.
    ///
    /// Delivery is FIFO per node, so context sent here is applied before any
    /// later coefficient-init request arrives.
    pub async fn distribute_inputs(&self) -> Result<()> {
        let (params, pairs) = {
            let inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
            let params = inputs
                .params
                .clone()
                .ok_or(EngineError::MissingInput("parameters"))?;
            let pairs: Vec<(Slice, RigidTransform)> = inputs
                .slices
                .iter()
                .cloned()
                .zip(inputs.transforms.iter().copied())
                .collect();
            (params, pairs)
        };

        let param_frame = encode_message(&Message::Parameters(params))?;
        let slice_frame = encode_message(&Message::Slices(pairs))?;
        let nodes = self.pool.nodes()?;
        info!(nodes = nodes.len(), "distributing run context");
        for &nid in &nodes {
            self.transport.send(nid, self.id, param_frame.clone()).await?;
            self.transport.send(nid, self.id, slice_frame.clone()).await?;
        }
        Ok(())
    }

    /// Replace the run's slice transforms between phases, locally and on
    /// every backend (e.g. after a registration pass on the front end).
    pub async fn distribute_transforms(&self, transforms: Vec<RigidTransform>) -> Result<()> {
        {
            let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
            if transforms.len() != inputs.slices.len() {
                return Err(EngineError::TransformCountMismatch {
                    count: transforms.len(),
                    slices: inputs.slices.len(),
                });
            }
            inputs.transforms = transforms.clone();
        }
        let frame = encode_message(&Message::Transformations(transforms))?;
        for &nid in &self.pool.nodes()? {
            self.transport.send(nid, self.id, frame.clone()).await?;
        }
        Ok(())
    }

    /// Phase 4: coefficient initialization across the pool.
    ///
    /// The slice set is split into one contiguous range per node; every node
    /// gets exactly one request (an empty range is a legal no-op request).
    /// Shares are merged by absolute slice index, so the result is ordered
    /// by slice regardless of reply order.
    pub async fn coefficient_init(&self) -> Result<Vec<SliceCoefficients>> {
        let nodes = self.pool.nodes()?;
        if nodes.is_empty() {
            return Err(EngineError::Phase("coefficient-init with an empty pool".into()));
        }

        let (slice_count, params, volume, mask) = {
            let inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
            let params = inputs
                .params
                .as_ref()
                .map(svr_types::CoeffInitParams::from_run)
                .ok_or(EngineError::MissingInput("parameters"))?;
            let volume = inputs.volume.ok_or(EngineError::MissingInput("volume geometry"))?;
            let mask = inputs.mask.as_ref().map(|m| m.data.clone());
            (inputs.slices.len(), params, volume, mask)
        };

        let phase_started = Instant::now();
        let ranges = split_ranges(slice_count, nodes.len());
        let mut pending: Vec<Completion<CoeffShare>> = Vec::with_capacity(nodes.len());
        for (&nid, range) in nodes.iter().zip(&ranges) {
            let (request_id, completion) = self.coeff_replies.new_request();
            let frame = encode_message(&Message::CoeffInitRequest(CoeffInitRequest {
                request_id,
                start: range.start as u32,
                end: range.end as u32,
                params,
                volume,
                mask: mask.clone(),
            }))?;
            debug!(%nid, %request_id, start = range.start, end = range.end,
                "coefficient-init request");
            self.transport.send(nid, self.id, frame).await?;
            pending.push(completion);
        }

        let mut merged = vec![None::<SliceCoefficients>; slice_count];
        for completion in pending {
            let share = self.await_reply(completion).await?;
            for (k, sc) in share.coeffs.into_iter().enumerate() {
                let index = share.start as usize + k;
                let slot = merged.get_mut(index).ok_or_else(|| {
                    EngineError::Phase(format!(
                        "share places slice {index} outside the {slice_count}-slice run"
                    ))
                })?;
                if slot.replace(sc).is_some() {
                    return Err(EngineError::Phase(format!(
                        "slice {index} produced by more than one node"
                    )));
                }
            }
        }

        let mut out = Vec::with_capacity(slice_count);
        for (index, slot) in merged.into_iter().enumerate() {
            out.push(slot.ok_or_else(|| {
                EngineError::Phase(format!("no node produced slice {index}"))
            })?);
        }

        info!(
            slices = slice_count,
            nodes = nodes.len(),
            elapsed_ms = phase_started.elapsed().as_millis() as u64,
            "coefficient-init complete"
        );
        Ok(out)
    }

    /// Liveness probe against one backend; resolves to the responding node.
    pub async fn ping(&self, nid: NodeId) -> Result<NodeId> {
        let (request_id, completion) = self.ping_replies.new_request();
        let frame = encode_message(&Message::Ping { request_id })?;
        self.transport.send(nid, self.id, frame).await?;
        self.await_reply(completion).await
    }

    /// Run phases 2–4 in order after `allocate_backends`.
    pub async fn execute(&self) -> Result<Vec<SliceCoefficients>> {
        self.wait_pool().await?;
        self.distribute_inputs().await?;
        self.coefficient_init().await
    }

    /// Await one reply, honoring the configured request timeout. `None`
    /// blocks indefinitely; `Some(d)` fails the phase after `d`.
    async fn await_reply<T>(&self, completion: Completion<T>) -> Result<T> {
        match self.config.request_timeout {
            None => Ok(completion.wait().await?),
            Some(limit) => match tokio::time::timeout(limit, completion.wait()).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(EngineError::PhaseTimeout(limit)),
            },
        }
    }
}

#[async_trait]
impl MessageHandler for Reconstruction {
    async fn handle(&self, src: NodeId, tag: OpTag, payload: Vec<u8>) -> svr_runtime::Result<()> {
        match svr_wire::decode_payload(tag, &payload)? {
            Message::NodeReady => self.pool.register_node(src),
            Message::CoeffInitResult(share) => {
                let request_id = share.request_id;
                self.coeff_replies.fulfill(request_id, share)
            }
            Message::Pong { request_id } => self.ping_replies.fulfill(request_id, src),
            other => {
                warn!(%src, tag = ?other.tag(), "unexpected message on the front end");
                Err(RuntimeError::Handler(format!(
                    "unexpected {:?} on the front end",
                    other.tag()
                )))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
//
// Coordinator behavior against live backends is exercised end-to-end in
// `cluster`; these cover the reply-correlation paths in isolation.
