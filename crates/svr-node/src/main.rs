//! svr-node binary — in-process reconstruction demo and liveness probe.
//!
//! ```bash
//! # Run a 3-backend coefficient-init demo on synthetic slices
//! RUST_LOG=info cargo run --bin svr-node -- demo --backends 3 --slices 24
//!
//! # Same pipeline, with a per-request reply deadline
//! RUST_LOG=info cargo run --bin svr-node -- demo --timeout-ms 5000
//!
//! # Provision backends and ping each one
//! RUST_LOG=info cargo run --bin svr-node -- ping --backends 4
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use svr_engine::{CoefficientModel, LocalCluster};
use svr_types::{
    CoeffInitParams, ImageAttributes, ReconstructionParams, RigidTransform, RuntimeConfig, Slice,
    SliceCoefficients, VolumeGeometry, VolumeMask, VoxelCoefficient,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "svr-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Slice-to-volume reconstruction substrate — local demo harness"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full coefficient-init phase on synthetic slices.
    Demo(DemoArgs),

    /// Provision a backend pool and ping every node.
    Ping {
        #[arg(long, default_value_t = 2)]
        backends: usize,
    },
}

#[derive(Args)]
struct DemoArgs {
    /// Backend nodes to provision.
    #[arg(long, default_value_t = 3)]
    backends: usize,

    /// Synthetic slices to distribute.
    #[arg(long, default_value_t = 24)]
    slices: usize,

    /// Worker threads per backend.
    #[arg(long, default_value_t = 2)]
    workers: u32,

    /// Reply deadline per coefficient-init request, in milliseconds.
    /// Omitted: wait indefinitely.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

// ── Demo model ────────────────────────────────────────────────────────────────

/// Nearest-voxel model for the demo: each slice pixel contributes its full
/// weight to the voxel its centre lands in. Real deployments plug in a
/// point-spread-function model here.
struct NearestVoxelModel;

impl CoefficientModel for NearestVoxelModel {
    fn slice_coefficients(
        &self,
        slice: &Slice,
        transform: &RigidTransform,
        volume: &VolumeGeometry,
        mask: Option<&VolumeMask>,
        _params: &CoeffInitParams,
    ) -> SliceCoefficients {
        let attrs = &slice.attrs;
        let mut coeffs = Vec::with_capacity(slice.pixel_count());
        for j in 0..attrs.y {
            for i in 0..attrs.x {
                let world = transform.apply([
                    attrs.origin[0] + f64::from(i) * attrs.dx,
                    attrs.origin[1] + f64::from(j) * attrs.dy,
                    attrs.origin[2],
                ]);
                let v = volume.world_to_voxel(world);
                let Some(voxel) = volume.linear_index(
                    v[0].round() as i64,
                    v[1].round() as i64,
                    v[2].round() as i64,
                ) else {
                    continue;
                };
                if mask.is_some_and(|m| !m.contains(voxel)) {
                    continue;
                }
                coeffs.push(VoxelCoefficient { voxel, weight: 1.0 });
            }
        }
        coeffs.into_iter().collect()
    }
}

// ── Synthetic inputs ──────────────────────────────────────────────────────────

fn synthetic_inputs(count: usize) -> Result<(Vec<Slice>, Vec<RigidTransform>, VolumeGeometry)> {
    let (x, y) = (16u32, 16u32);
    let mut slices = Vec::with_capacity(count);
    for k in 0..count {
        let attrs = ImageAttributes {
            x,
            y,
            dx: 1.0,
            dy: 1.0,
            dz: 1.0,
            origin: [0.0, 0.0, k as f64],
            thickness: 2.0,
        };
        let data = (0..x * y).map(|p| (p + k as u32) as f32).collect();
        slices.push(Slice::new(attrs, data)?);
    }
    let volume = VolumeGeometry {
        dims: [x, y, count as u32],
        spacing: [1.0; 3],
        origin: [0.0; 3],
    };
    Ok((slices, vec![RigidTransform::identity(); count], volume))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=svr_engine=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo(args) => run_demo(args).await,
        Command::Ping { backends } => run_ping(backends).await,
    }
}

// ── Demo mode ─────────────────────────────────────────────────────────────────

async fn run_demo(args: DemoArgs) -> Result<()> {
    let config = RuntimeConfig {
        worker_threads: args.workers,
        request_timeout: args.timeout_ms.map(Duration::from_millis),
        ..Default::default()
    };

    let cluster =
        LocalCluster::start(config, Arc::new(NearestVoxelModel), args.backends).await?;
    let coord = cluster.coordinator();
    info!(run_id = %coord.run_id(), backends = args.backends, slices = args.slices,
        "demo run starting");

    let (slices, transforms, volume) = synthetic_inputs(args.slices)?;
    coord.set_parameters(ReconstructionParams {
        num_threads: args.workers,
        ..Default::default()
    });
    coord.set_inputs(slices, transforms, volume, None)?;

    let coeffs = coord.execute().await?;
    let total: usize = coeffs.iter().map(SliceCoefficients::len).sum();
    let empty = coeffs.iter().filter(|c| c.is_empty()).count();
    info!(slices = coeffs.len(), coefficients = total, empty_slices = empty, "demo complete");

    cluster.shutdown();
    Ok(())
}

// ── Ping mode ─────────────────────────────────────────────────────────────────

async fn run_ping(backends: usize) -> Result<()> {
    let cluster = LocalCluster::start(
        RuntimeConfig::default(),
        Arc::new(NearestVoxelModel),
        backends,
    )
    .await?;
    let coord = cluster.coordinator();
    coord.wait_pool().await?;

    for nid in coord.pool_nodes()? {
        let responder = coord.ping(nid).await?;
        info!(%responder, "pong");
    }
    cluster.shutdown();
    Ok(())
}
