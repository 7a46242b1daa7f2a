//! Slice-to-volume contribution coefficients.

// ── Voxel coefficient ─────────────────────────────────────────────────────────

/// One (voxel, weight) contribution of a slice pixel to the reconstruction
/// volume. `voxel` is a linear index into the volume geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelCoefficient {
    pub voxel: u32,
    pub weight: f64,
}

// ── Slice coefficients ────────────────────────────────────────────────────────

/// The ordered contribution set for one slice, produced exactly once per
/// slice per coefficient-init phase.
///
/// An empty set is legal — it means the slice lies entirely outside the
/// reconstruction volume (or its mask) — and is encoded as a zero-length
/// list, never as an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceCoefficients {
    pub coeffs: Vec<VoxelCoefficient>,
}

impl SliceCoefficients {
    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    /// Sum of contribution weights, usable by the caller as a normalization
    /// denominator.
    pub fn weight_sum(&self) -> f64 {
        self.coeffs.iter().map(|c| c.weight).sum()
    }
}

impl FromIterator<VoxelCoefficient> for SliceCoefficients {
    fn from_iter<I: IntoIterator<Item = VoxelCoefficient>>(iter: I) -> Self {
        Self {
            coeffs: iter.into_iter().collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
