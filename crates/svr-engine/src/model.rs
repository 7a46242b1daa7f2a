//! Seam to the numeric collaborator.
//!
//! The substrate never computes point-spread functions or interpolation
//! weights itself. It hands each slice, its current transform, and the run
//! context to a [`CoefficientModel`] and ships back whatever the model
//! produces. Models must be pure with respect to their inputs: the same
//! slice and context yield the same coefficients regardless of which node
//! or worker thread evaluates them.

use svr_types::{CoeffInitParams, RigidTransform, Slice, SliceCoefficients, VolumeGeometry,
    VolumeMask};

/// Computes the volume-contribution coefficients for one slice.
///
/// Called from worker threads; implementations are shared across workers and
/// must be `Send + Sync`.
pub trait CoefficientModel: Send + Sync {
    fn slice_coefficients(
        &self,
        slice: &Slice,
        transform: &RigidTransform,
        volume: &VolumeGeometry,
        mask: Option<&VolumeMask>,
        params: &CoeffInitParams,
    ) -> SliceCoefficients;
}
