//! Per-slice EM state held by a backend.
//!
//! Initialized when a slice set lands on the node and reset to neutral
//! values before each EM pass: unit scales and slice weights, zero
//! potentials, zero bias fields, unit voxel weights. Replacing the slice
//! set rebuilds the whole state.

use svr_types::Slice;

// ── EM state ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EmState {
    /// Per-slice intensity scale factors.
    pub scales: Vec<f64>,
    /// Per-slice inclusion weights.
    pub slice_weights: Vec<f64>,
    /// Per-slice potential accumulated by the E-step.
    pub slice_potentials: Vec<f64>,
    /// Per-slice additive bias field, one value per pixel.
    pub biases: Vec<Vec<f64>>,
    /// Per-slice per-pixel voxel weights.
    pub weights: Vec<Vec<f64>>,
}

impl EmState {
    /// Build neutral EM state sized to `slices`.
    pub fn initialize(slices: &[Slice]) -> Self {
        let n = slices.len();
        let mut state = Self {
            scales: vec![0.0; n],
            slice_weights: vec![0.0; n],
            slice_potentials: vec![0.0; n],
            biases: slices.iter().map(|s| vec![0.0; s.pixel_count()]).collect(),
            weights: slices.iter().map(|s| vec![0.0; s.pixel_count()]).collect(),
        };
        state.reset_values();
        state
    }

    /// Reset to neutral values without resizing: unit scales, unit slice
    /// weights, zero potentials, zero bias, unit voxel weights.
    pub fn reset_values(&mut self) {
        self.scales.fill(1.0);
        self.slice_weights.fill(1.0);
        self.slice_potentials.fill(0.0);
        for bias in &mut self.biases {
            bias.fill(0.0);
        }
        for w in &mut self.weights {
            w.fill(1.0);
        }
    }

    pub fn slice_count(&self) -> usize {
        self.scales.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
