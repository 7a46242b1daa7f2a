//! `svr-engine` — the distributed reconstruction engine.
//!
//! Ties the substrate together: the front-end [`Reconstruction`]
//! coordinator drives the phase sequence, [`BackendWorker`]s serve
//! coefficient-init requests with scoped worker threads, and
//! [`CoefficientModel`] is the seam to the numeric collaborator. The
//! engine coordinates and ships data; it never computes interpolation
//! weights itself.

pub mod backend;
pub mod cluster;
pub mod coeff_init;
pub mod coordinator;
pub mod em;
pub mod error;
pub mod model;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use backend::BackendWorker;
pub use cluster::{LocalCluster, LocalLauncher};
pub use coeff_init::{run_coeff_init, split_ranges};
pub use coordinator::{Reconstruction, RECONSTRUCTION_EBB};
pub use em::EmState;
pub use error::{EngineError, Result};
pub use model::CoefficientModel;
