//! In-process cluster harness.
//!
//! Stands up a front end and N backends on a [`LocalRouter`], with a
//! [`LocalLauncher`] standing in for an external process launcher: each
//! "launch" attaches a fresh node to the router, materializes a
//! [`BackendWorker`] under the shared reconstruction id, starts its
//! dispatch loop, and performs the boot handshake. Used by the demo binary
//! and the end-to-end tests; a real deployment supplies its own launcher
//! and transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use svr_runtime::{
    run_dispatch_loop, EbbRegistry, LocalRouter, MessageDispatcher, NodeLauncher, PoolAllocator,
    RuntimeError, Transport,
};
use svr_types::{NodeId, RuntimeConfig};

use crate::backend::BackendWorker;
use crate::coordinator::{Reconstruction, RECONSTRUCTION_EBB};
use crate::error::Result;
use crate::model::CoefficientModel;

// ── Local launcher ────────────────────────────────────────────────────────────

/// Launches backends as in-process nodes on a shared router.
pub struct LocalLauncher {
    router: Arc<LocalRouter>,
    model: Arc<dyn CoefficientModel>,
    front: NodeId,
    default_workers: u32,
    /// Simulated capacity; `None` is unlimited.
    available: Option<usize>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalLauncher {
    pub fn new(
        router: Arc<LocalRouter>,
        model: Arc<dyn CoefficientModel>,
        front: NodeId,
        default_workers: u32,
    ) -> Self {
        Self {
            router,
            model,
            front,
            default_workers,
            available: None,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Cap how many nodes this launcher can start.
    pub fn with_available(mut self, available: usize) -> Self {
        self.available = Some(available);
        self
    }

    fn abort_loops(&self) {
        for handle in self.loops.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl NodeLauncher for LocalLauncher {
    async fn launch(&self, image: &str, count: usize) -> svr_runtime::Result<()> {
        if let Some(available) = self.available {
            if count > available {
                return Err(RuntimeError::Provisioning(format!(
                    "requested {count} nodes, only {available} available"
                )));
            }
        }

        for _ in 0..count {
            let (endpoint, inbox) = self.router.attach();
            let node = endpoint.local_node();
            info!(%node, image, "backend node launched");

            let registry = EbbRegistry::new();
            let dispatcher = Arc::new(MessageDispatcher::new());
            let model = Arc::clone(&self.model);
            let transport = Arc::new(endpoint);
            let backend = registry.handle_fault(RECONSTRUCTION_EBB, |id| {
                BackendWorker::new(id, transport, model, self.default_workers)
            })?;
            dispatcher.register(RECONSTRUCTION_EBB, backend.clone())?;

            let handle = run_dispatch_loop(dispatcher, inbox);
            self.loops
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);

            backend
                .announce_ready(self.front)
                .await
                .map_err(|e| RuntimeError::Provisioning(e.to_string()))?;
        }
        Ok(())
    }
}

// ── Cluster ───────────────────────────────────────────────────────────────────

pub struct LocalCluster {
    coordinator: Arc<Reconstruction>,
    launcher: LocalLauncher,
    front_loop: JoinHandle<()>,
}

impl LocalCluster {
    /// Stand up the front end and provision `backend_count` backends. The
    /// pool is allocated but not awaited; call methods on the coordinator
    /// (typically `execute`) to drive the phases.
    pub async fn start(
        config: RuntimeConfig,
        model: Arc<dyn CoefficientModel>,
        backend_count: usize,
    ) -> Result<Self> {
        let router = LocalRouter::new(config.channel_capacity);
        let (front_endpoint, front_inbox) = router.attach();
        let front = front_endpoint.local_node();

        let registry = EbbRegistry::new();
        let dispatcher = Arc::new(MessageDispatcher::new());
        let pool = Arc::new(PoolAllocator::new());
        let transport = Arc::new(front_endpoint);
        let coordinator = registry.handle_fault(RECONSTRUCTION_EBB, |id| {
            Reconstruction::new(id, transport, Arc::clone(&pool), config.clone())
        })?;
        dispatcher.register(RECONSTRUCTION_EBB, coordinator.clone())?;
        let front_loop = run_dispatch_loop(dispatcher, front_inbox);

        let launcher = LocalLauncher::new(router, model, front, config.worker_threads);
        coordinator
            .allocate_backends(&launcher, "svr-backend", backend_count)
            .await?;

        Ok(Self {
            coordinator,
            launcher,
            front_loop,
        })
    }

    pub fn coordinator(&self) -> &Arc<Reconstruction> {
        &self.coordinator
    }

    pub fn shutdown(self) {
        self.launcher.abort_loops();
        self.front_loop.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use svr_types::{
        CoeffInitParams, ImageAttributes, ReconstructionParams, RigidTransform, Slice,
        SliceCoefficients, VolumeGeometry, VolumeMask, VoxelCoefficient,
    };
    use crate::error::EngineError;

    /// Projects each slice's centre through its transform into the volume —
    /// enough numerics to make results depend on every input.
    struct CentreModel;

    impl CoefficientModel for CentreModel {
        fn slice_coefficients(
            &self,
            slice: &Slice,
            transform: &RigidTransform,
            volume: &VolumeGeometry,
            mask: Option<&VolumeMask>,
            params: &CoeffInitParams,
        ) -> SliceCoefficients {
            let centre = transform.apply(slice.attrs.origin);
            let v = volume.world_to_voxel(centre);
            let Some(voxel) = volume.linear_index(
                v[0].round() as i64,
                v[1].round() as i64,
                v[2].round() as i64,
            ) else {
                return SliceCoefficients::default();
            };
            if mask.is_some_and(|m| !m.contains(voxel)) {
                return SliceCoefficients::default();
            }
            if f64::from(slice.max_intensity) < params.low_intensity_cutoff {
                return SliceCoefficients::default();
            }
            [VoxelCoefficient { voxel, weight: 1.0 / params.delta }]
                .into_iter()
                .collect()
        }
    }

    /// Never answers in time.
    struct StallingModel;

    impl CoefficientModel for StallingModel {
        fn slice_coefficients(
            &self,
            _slice: &Slice,
            _transform: &RigidTransform,
            _volume: &VolumeGeometry,
            _mask: Option<&VolumeMask>,
            _params: &CoeffInitParams,
        ) -> SliceCoefficients {
            std::thread::sleep(Duration::from_millis(500));
            SliceCoefficients::default()
        }
    }

    fn inputs(n: usize) -> (Vec<Slice>, Vec<RigidTransform>, VolumeGeometry) {
        let slices = (0..n)
            .map(|i| {
                let attrs = ImageAttributes {
                    x: 2,
                    y: 2,
                    dx: 1.0,
                    dy: 1.0,
                    dz: 1.0,
                    origin: [1.0, 1.0, i as f64],
                    thickness: 2.0,
                };
                Slice::new(attrs, vec![100.0 + i as f32; 4]).unwrap()
            })
            .collect();
        let volume = VolumeGeometry {
            dims: [4, 4, n as u32],
            spacing: [1.0; 3],
            origin: [0.0; 3],
        };
        (slices, vec![RigidTransform::identity(); n], volume)
    }

    async fn run(
        backends: usize,
        slices: usize,
        workers: u32,
    ) -> Vec<SliceCoefficients> {
        let config = RuntimeConfig {
            worker_threads: workers,
            ..Default::default()
        };
        let cluster = LocalCluster::start(config, Arc::new(CentreModel), backends)
            .await
            .unwrap();
        let (slices, transforms, volume) = inputs(slices);
        let coord = cluster.coordinator();
        coord.set_parameters(ReconstructionParams {
            num_threads: workers,
            ..Default::default()
        });
        coord.set_inputs(slices, transforms, volume, None).unwrap();
        let out = coord.execute().await.unwrap();
        cluster.shutdown();
        out
    }

    #[tokio::test]
    async fn single_node_pipeline_produces_one_set_per_slice() {
        let out = run(1, 4, 1).await;
        assert_eq!(out.len(), 4);
        let delta = ReconstructionParams::default().delta;
        for (i, sc) in out.iter().enumerate() {
            assert_eq!(sc.len(), 1, "slice {i}");
            assert!((sc.weight_sum() - 1.0 / delta).abs() < 1e-12, "slice {i}");
        }
    }

    #[tokio::test]
    async fn replacement_transforms_reach_every_backend() {
        let cluster = LocalCluster::start(RuntimeConfig::default(), Arc::new(CentreModel), 2)
            .await
            .unwrap();
        let (slices, transforms, volume) = inputs(4);
        let coord = cluster.coordinator();
        coord.set_parameters(ReconstructionParams::default());
        coord.set_inputs(slices, transforms, volume, None).unwrap();
        let before = coord.execute().await.unwrap();

        // Shift every slice one voxel along z; the last one leaves the volume.
        let mut shifted = RigidTransform::identity();
        shifted.translation = [0.0, 0.0, 1.0];
        coord.distribute_transforms(vec![shifted; 4]).await.unwrap();
        let after = coord.coefficient_init().await.unwrap();

        assert_ne!(after, before);
        assert_eq!(after[0].coeffs[0].voxel, before[1].coeffs[0].voxel);
        assert!(after[3].is_empty());
        cluster.shutdown();
    }

    #[tokio::test]
    async fn node_split_does_not_change_results() {
        let reference = run(1, 9, 1).await;
        let split = run(3, 9, 2).await;
        assert_eq!(split, reference);

        // Uneven split, more nodes than divides evenly.
        let uneven = run(4, 9, 1).await;
        assert_eq!(uneven, reference);
    }

    #[tokio::test]
    async fn more_nodes_than_slices_is_legal() {
        // Two of the five nodes receive empty ranges.
        let out = run(5, 3, 1).await;
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn mask_flows_through_to_backends() {
        let cluster = LocalCluster::start(
            RuntimeConfig::default(),
            Arc::new(CentreModel),
            2,
        )
        .await
        .unwrap();
        let (slices, transforms, volume) = inputs(4);
        let mut mask = VolumeMask::full(volume);
        mask.data.fill(0); // everything outside the region of interest
        let coord = cluster.coordinator();
        coord.set_parameters(ReconstructionParams::default());
        coord
            .set_inputs(slices, transforms, volume, Some(mask))
            .unwrap();
        let out = coord.execute().await.unwrap();
        assert!(out.iter().all(SliceCoefficients::is_empty));
        cluster.shutdown();
    }

    #[tokio::test]
    async fn ping_round_trips_to_each_backend() {
        let cluster = LocalCluster::start(RuntimeConfig::default(), Arc::new(CentreModel), 3)
            .await
            .unwrap();
        let coord = cluster.coordinator();
        coord.wait_pool().await.unwrap();
        for nid in coord.pool_nodes().unwrap() {
            assert_eq!(coord.ping(nid).await.unwrap(), nid);
        }
        cluster.shutdown();
    }

    #[tokio::test]
    async fn insufficient_capacity_fails_the_run_before_any_phase() {
        let config = RuntimeConfig::default();
        let router = LocalRouter::new(config.channel_capacity);
        let (front_endpoint, _front_inbox) = router.attach();
        let front = front_endpoint.local_node();
        let pool = Arc::new(PoolAllocator::new());
        let coordinator = Reconstruction::new(
            RECONSTRUCTION_EBB,
            Arc::new(front_endpoint),
            Arc::clone(&pool),
            config,
        );
        let launcher =
            LocalLauncher::new(router, Arc::new(CentreModel), front, 1).with_available(2);

        let err = coordinator
            .allocate_backends(&launcher, "svr-backend", 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Runtime(RuntimeError::Provisioning(_))
        ));
        launcher.abort_loops();
    }

    #[tokio::test]
    async fn configured_timeout_fails_a_stalled_phase() {
        let config = RuntimeConfig {
            request_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cluster = LocalCluster::start(config, Arc::new(StallingModel), 1)
            .await
            .unwrap();
        let (slices, transforms, volume) = inputs(2);
        let coord = cluster.coordinator();
        coord.set_parameters(ReconstructionParams::default());
        coord.set_inputs(slices, transforms, volume, None).unwrap();
        let err = coord.execute().await.unwrap_err();
        assert!(matches!(err, EngineError::PhaseTimeout(_)));
        cluster.shutdown();
    }
}
