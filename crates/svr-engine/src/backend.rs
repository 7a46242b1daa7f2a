//! Backend-side reconstruction object.
//!
//! One [`BackendWorker`] lives on each provisioned node, materialized under
//! the same object id as the front-end coordinator. It accumulates the run
//! context pushed by the front end (parameters, slices, transforms), then
//! serves coefficient-init requests by fanning the assigned slice range out
//! to local worker threads and shipping the aggregated share back to the
//! requester.
//!
//! Coefficient computation runs on the blocking pool, never on the dispatch
//! path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use svr_runtime::{MessageHandler, RuntimeError, Transport};
use svr_types::{EbbId, NodeId, ReconstructionParams, RigidTransform, Slice, VolumeMask};
use svr_wire::{encode_message, CoeffInitRequest, CoeffShare, Message, OpTag};

use crate::coeff_init::run_coeff_init;
use crate::em::EmState;
use crate::error::{EngineError, Result};
use crate::model::CoefficientModel;

// ── Backend state ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct BackendState {
    params: Option<ReconstructionParams>,
    // Shared read-only with in-flight coefficient-init tasks.
    slices: Arc<Vec<Slice>>,
    transforms: Arc<Vec<RigidTransform>>,
    em: Option<EmState>,
}

// ── Backend worker ────────────────────────────────────────────────────────────

pub struct BackendWorker {
    id: EbbId,
    transport: Arc<dyn Transport>,
    model: Arc<dyn CoefficientModel>,
    /// Worker threads when a request carries no explicit thread count.
    default_workers: u32,
    state: Mutex<BackendState>,
}

impl BackendWorker {
    pub fn new(
        id: EbbId,
        transport: Arc<dyn Transport>,
        model: Arc<dyn CoefficientModel>,
        default_workers: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            transport,
            model,
            default_workers: default_workers.max(1),
            state: Mutex::new(BackendState::default()),
        })
    }

    /// Boot handshake: tell the front end this node is reachable.
    pub async fn announce_ready(&self, front: NodeId) -> Result<()> {
        let frame = encode_message(&Message::NodeReady)?;
        self.transport.send(front, self.id, frame).await?;
        Ok(())
    }

    fn store_parameters(&self, params: ReconstructionParams) {
        info!(iterations = params.iterations, num_threads = params.num_threads,
            "run parameters received");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.params = Some(params);
    }

    /// Install the run's slice set. EM state is rebuilt from scratch; a
    /// replacement slice set never inherits values from the previous one.
    fn store_slices(&self, pairs: Vec<(Slice, RigidTransform)>) {
        let (slices, transforms): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        info!(count = slices.len(), "slice set received");
        let em = EmState::initialize(&slices);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slices = Arc::new(slices);
        state.transforms = Arc::new(transforms);
        state.em = Some(em);
    }

    fn store_transforms(&self, transforms: Vec<RigidTransform>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if transforms.len() != state.slices.len() {
            return Err(EngineError::TransformCountMismatch {
                count: transforms.len(),
                slices: state.slices.len(),
            });
        }
        state.transforms = Arc::new(transforms);
        Ok(())
    }

    /// Snapshot the run context synchronously (so earlier state messages are
    /// already applied), then compute and reply from a background task —
    /// the node's dispatch loop stays free while workers run.
    fn serve_coeff_init(&self, src: NodeId, req: CoeffInitRequest) -> Result<()> {
        let (slices, transforms, workers) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.params.is_none() {
                return Err(EngineError::MissingInput("parameters"));
            }
            let workers = if req.params.num_threads == 0 {
                self.default_workers
            } else {
                req.params.num_threads
            };
            (Arc::clone(&state.slices), Arc::clone(&state.transforms), workers)
        };

        let mask = match req.mask {
            Some(data) => Some(VolumeMask::new(req.volume, data)?),
            None => None,
        };

        let request_id = req.request_id;
        let (start, end) = (req.start as usize, req.end as usize);
        debug!(%request_id, start, end, workers, "serving coefficient-init");

        let params = req.params;
        let volume = req.volume;
        let share_start = req.start;
        let model = Arc::clone(&self.model);
        let transport = Arc::clone(&self.transport);
        let ebb = self.id;
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                run_coeff_init(
                    model.as_ref(),
                    &slices,
                    &transforms,
                    &volume,
                    mask.as_ref(),
                    &params,
                    start..end,
                    workers as usize,
                )
            })
            .await
            .map_err(|e| EngineError::Phase(format!("coefficient-init worker panicked: {e}")))
            .and_then(|r| r);

            let reply = match result {
                Ok(coeffs) => encode_message(&Message::CoeffInitResult(CoeffShare {
                    request_id,
                    start: share_start,
                    coeffs,
                })),
                Err(e) => {
                    warn!(%request_id, %e, "coefficient-init failed; no share sent");
                    return;
                }
            };
            match reply {
                Ok(frame) => {
                    if let Err(e) = transport.send(src, ebb, frame).await {
                        warn!(%request_id, %e, "could not deliver coefficient share");
                    }
                }
                Err(e) => warn!(%request_id, %e, "could not encode coefficient share"),
            }
        });
        Ok(())
    }

    async fn dispatch(&self, src: NodeId, tag: OpTag, payload: Vec<u8>) -> Result<()> {
        match svr_wire::decode_payload(tag, &payload)? {
            Message::Parameters(params) => {
                self.store_parameters(params);
                Ok(())
            }
            Message::Slices(pairs) => {
                self.store_slices(pairs);
                Ok(())
            }
            Message::Transformations(transforms) => self.store_transforms(transforms),
            Message::CoeffInitRequest(req) => self.serve_coeff_init(src, req),
            Message::Ping { request_id } => {
                let frame = encode_message(&Message::Pong { request_id })?;
                self.transport.send(src, self.id, frame).await?;
                Ok(())
            }
            other => Err(EngineError::Phase(format!(
                "unexpected {:?} on a backend node",
                other.tag()
            ))),
        }
    }

    #[cfg(test)]
    fn em_state(&self) -> Option<EmState> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .em
            .clone()
    }
}

#[async_trait]
impl MessageHandler for BackendWorker {
    async fn handle(&self, src: NodeId, tag: OpTag, payload: Vec<u8>) -> svr_runtime::Result<()> {
        self.dispatch(src, tag, payload).await.map_err(|e| match e {
            EngineError::Runtime(e) => e,
            EngineError::Wire(e) => RuntimeError::Wire(e),
            other => RuntimeError::Handler(other.to_string()),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use svr_runtime::{Envelope, LocalRouter};
    use svr_types::{CoeffInitParams, ImageAttributes, RequestId, SliceCoefficients,
        VolumeGeometry, VoxelCoefficient};
    use svr_wire::decode_message;
    use tokio::sync::mpsc;

    struct UnitModel;

    impl CoefficientModel for UnitModel {
        fn slice_coefficients(
            &self,
            slice: &Slice,
            _transform: &RigidTransform,
            _volume: &VolumeGeometry,
            _mask: Option<&VolumeMask>,
            _params: &CoeffInitParams,
        ) -> SliceCoefficients {
            [VoxelCoefficient {
                voxel: slice.attrs.origin[2] as u32,
                weight: 1.0,
            }]
            .into_iter()
            .collect()
        }
    }

    fn test_pairs(n: usize) -> Vec<(Slice, RigidTransform)> {
        (0..n)
            .map(|i| {
                let attrs = ImageAttributes {
                    x: 2,
                    y: 1,
                    dx: 1.0,
                    dy: 1.0,
                    dz: 2.0,
                    origin: [0.0, 0.0, i as f64],
                    thickness: 4.0,
                };
                (
                    Slice::new(attrs, vec![0.0, i as f32]).unwrap(),
                    RigidTransform::identity(),
                )
            })
            .collect()
    }

    fn volume() -> VolumeGeometry {
        VolumeGeometry {
            dims: [4, 4, 4],
            spacing: [1.0; 3],
            origin: [0.0; 3],
        }
    }

    async fn backend_with_inbox() -> (Arc<BackendWorker>, mpsc::Receiver<Envelope>, NodeId) {
        let router = LocalRouter::new(16);
        let (front_ep, front_rx) = router.attach();
        let (back_ep, _back_rx) = router.attach();
        let backend = BackendWorker::new(EbbId(1), Arc::new(back_ep), Arc::new(UnitModel), 1);
        (backend, front_rx, front_ep.local_node())
    }

    async fn deliver(backend: &BackendWorker, src: NodeId, msg: &Message) -> Result<()> {
        let frame = encode_message(msg).unwrap();
        backend.dispatch(src, msg.tag(), frame[4..].to_vec()).await
    }

    #[tokio::test]
    async fn slices_install_fresh_em_state() {
        let (backend, _rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Slices(test_pairs(3)))
            .await
            .unwrap();
        let em = backend.em_state().unwrap();
        assert_eq!(em.slice_count(), 3);
        assert_eq!(em.scales, vec![1.0; 3]);

        // A replacement slice set rebuilds rather than inherits.
        deliver(&backend, front, &Message::Slices(test_pairs(5)))
            .await
            .unwrap();
        assert_eq!(backend.em_state().unwrap().slice_count(), 5);
    }

    #[tokio::test]
    async fn coeff_init_replies_with_the_requested_range() {
        let (backend, mut rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Parameters(ReconstructionParams::default()))
            .await
            .unwrap();
        deliver(&backend, front, &Message::Slices(test_pairs(6)))
            .await
            .unwrap();

        let req = CoeffInitRequest {
            request_id: RequestId(42),
            start: 2,
            end: 5,
            params: CoeffInitParams::from_run(&ReconstructionParams::default()),
            volume: volume(),
            mask: None,
        };
        deliver(&backend, front, &Message::CoeffInitRequest(req))
            .await
            .unwrap();

        let env = rx.recv().await.unwrap();
        match decode_message(&env.frame).unwrap() {
            Message::CoeffInitResult(share) => {
                assert_eq!(share.request_id, RequestId(42));
                assert_eq!(share.start, 2);
                assert_eq!(share.coeffs.len(), 3);
                assert_eq!(share.coeffs[0].coeffs[0].voxel, 2);
            }
            other => panic!("expected a coefficient share, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn coeff_init_without_parameters_is_rejected() {
        let (backend, _rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Slices(test_pairs(2)))
            .await
            .unwrap();
        let req = CoeffInitRequest {
            request_id: RequestId(1),
            start: 0,
            end: 2,
            params: CoeffInitParams::from_run(&ReconstructionParams::default()),
            volume: volume(),
            mask: None,
        };
        let err = deliver(&backend, front, &Message::CoeffInitRequest(req))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingInput("parameters")));
    }

    #[tokio::test]
    async fn empty_range_is_served_as_an_empty_share() {
        let (backend, mut rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Parameters(ReconstructionParams::default()))
            .await
            .unwrap();
        deliver(&backend, front, &Message::Slices(test_pairs(2)))
            .await
            .unwrap();
        let req = CoeffInitRequest {
            request_id: RequestId(7),
            start: 1,
            end: 1,
            params: CoeffInitParams::from_run(&ReconstructionParams::default()),
            volume: volume(),
            mask: None,
        };
        deliver(&backend, front, &Message::CoeffInitRequest(req))
            .await
            .unwrap();
        let env = rx.recv().await.unwrap();
        match decode_message(&env.frame).unwrap() {
            Message::CoeffInitResult(share) => assert!(share.coeffs.is_empty()),
            other => panic!("expected a coefficient share, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replacement_transforms_must_match_the_slice_count() {
        let (backend, _rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Slices(test_pairs(3)))
            .await
            .unwrap();
        let err = deliver(
            &backend,
            front,
            &Message::Transformations(vec![RigidTransform::identity(); 2]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::TransformCountMismatch { count: 2, slices: 3 }));
    }

    #[tokio::test]
    async fn ping_is_answered_with_the_same_request_id() {
        let (backend, mut rx, front) = backend_with_inbox().await;
        deliver(&backend, front, &Message::Ping { request_id: RequestId(9) })
            .await
            .unwrap();
        let env = rx.recv().await.unwrap();
        assert_eq!(
            decode_message(&env.frame).unwrap(),
            Message::Pong { request_id: RequestId(9) }
        );
    }

    #[tokio::test]
    async fn front_end_only_messages_are_rejected() {
        let (backend, _rx, front) = backend_with_inbox().await;
        let err = deliver(&backend, front, &Message::NodeReady).await.unwrap_err();
        assert!(matches!(err, EngineError::Phase(_)));
    }
}
