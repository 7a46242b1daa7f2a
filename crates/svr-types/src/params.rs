//! Parameter snapshots pushed from the front end to every backend.

use serde::{Deserialize, Serialize};

// ── Reconstruction parameters ─────────────────────────────────────────────────

/// Immutable configuration snapshot for one reconstruction run.
///
/// Pushed once to every backend before any phase begins; all backends must
/// operate on an identical snapshot for a given run. The front-end glue
/// validates these before the substrate ever sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionParams {
    /// Registration-reconstruction iterations.
    pub iterations: u32,
    /// Stdev for the bias field, millimetres.
    pub sigma: f64,
    /// Isotropic resolution of the reconstructed volume, millimetres.
    pub resolution: f64,
    /// Target average intensity for the input stacks.
    pub average_value: f64,
    /// Edge-definition parameter.
    pub delta: f64,
    /// Smoothing parameter.
    pub lambda: f64,
    /// Smoothing parameter for the final iteration.
    pub last_iter_lambda: f64,
    /// Mask smoothing, millimetres.
    pub smooth_mask: f64,
    /// Correct bias against the previous volume estimate.
    pub global_bias_correction: bool,
    /// Lower intensity threshold for voxel inclusion in bias correction.
    pub low_intensity_cutoff: f64,
    /// Whether stack intensities are matched to `average_value`.
    pub intensity_matching: bool,
    /// Worker threads per backend node.
    pub num_threads: u32,
    pub debug: bool,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            sigma: 12.0,
            resolution: 0.75,
            average_value: 700.0,
            delta: 150.0,
            lambda: 0.02,
            last_iter_lambda: 0.01,
            smooth_mask: 4.0,
            global_bias_correction: false,
            low_intensity_cutoff: 0.01,
            intensity_matching: true,
            num_threads: 1,
            debug: false,
        }
    }
}

// ── Coefficient-init parameters ───────────────────────────────────────────────

/// Per-request numeric context for one coefficient-init call.
///
/// Travels with the request so a backend can compute coefficients for its
/// slice range without the full slice set being re-sent each call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoeffInitParams {
    pub delta: f64,
    pub lambda: f64,
    pub low_intensity_cutoff: f64,
    pub global_bias_correction: bool,
    /// Worker threads the backend should fan out to.
    pub num_threads: u32,
    pub debug: bool,
}

impl CoeffInitParams {
    /// Derive the per-request context from the run snapshot.
    pub fn from_run(params: &ReconstructionParams) -> Self {
        Self {
            delta: params.delta,
            lambda: params.lambda,
            low_intensity_cutoff: params.low_intensity_cutoff,
            global_bias_correction: params.global_bias_correction,
            num_threads: params.num_threads,
            debug: params.debug,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_front_end_documentation() {
        let p = ReconstructionParams::default();
        assert_eq!(p.sigma, 12.0);
        assert_eq!(p.resolution, 0.75);
        assert_eq!(p.delta, 150.0);
        assert!(p.intensity_matching);
        assert!(!p.global_bias_correction);
    }

    #[test]
    fn params_serde_round_trip() {
        let p = ReconstructionParams {
            num_threads: 4,
            debug: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&p).unwrap();
        let round: ReconstructionParams = serde_json::from_str(&json).unwrap();
        assert_eq!(round, p);
    }

    #[test]
    fn coeff_params_derive_from_run() {
        let run = ReconstructionParams {
            delta: 10.0,
            num_threads: 8,
            ..Default::default()
        };
        let c = CoeffInitParams::from_run(&run);
        assert_eq!(c.delta, 10.0);
        assert_eq!(c.num_threads, 8);
        assert_eq!(c.lambda, run.lambda);
    }
}
