//! Image, transform, and volume-geometry types.
//!
//! These are plain data carriers. The substrate ships them between nodes and
//! hands them to the numeric collaborator; it never interprets the pixel
//! values itself.

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

// ── Image attributes ──────────────────────────────────────────────────────────

/// Spatial metadata for one 2-D slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    /// In-plane dimensions.
    pub x: u32,
    pub y: u32,
    /// Voxel spacing in millimetres.
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// World-space origin of the slice centre.
    pub origin: [f64; 3],
    /// Acquired slice thickness (defaults to 2 × dz upstream).
    pub thickness: f64,
}

// ── Slice ─────────────────────────────────────────────────────────────────────

/// One 2-D input image: attributes, a contiguous pixel buffer, and the
/// intensity statistics the reconstruction phases consult.
///
/// Read-only for the duration of a phase once distributed to backends.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub attrs: ImageAttributes,
    pub data: Vec<f32>,
    pub min_intensity: f32,
    pub max_intensity: f32,
}

impl Slice {
    /// Build a slice, validating that the buffer matches the dimensions and
    /// deriving the intensity range.
    pub fn new(attrs: ImageAttributes, data: Vec<f32>) -> Result<Self, TypesError> {
        let expected = attrs.x as usize * attrs.y as usize;
        if data.len() != expected {
            return Err(TypesError::PixelBufferMismatch {
                x: attrs.x,
                y: attrs.y,
                actual: data.len(),
            });
        }
        let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
        for &v in &data {
            min = min.min(v);
            max = max.max(v);
        }
        if data.is_empty() {
            min = 0.0;
            max = 0.0;
        }
        Ok(Self {
            attrs,
            data,
            min_intensity: min,
            max_intensity: max,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }

    /// Pixel value at (i, j), row-major.
    pub fn at(&self, i: u32, j: u32) -> f32 {
        self.data[(j * self.attrs.x + i) as usize]
    }
}

// ── Rigid transform ───────────────────────────────────────────────────────────

/// Rigid (rotation + translation) world-space transform for one slice or
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    /// Apply to a world-space point.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + self.translation[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + self.translation[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + self.translation[2],
        ]
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

// ── Volume geometry ───────────────────────────────────────────────────────────

/// Geometry of the reconstruction volume: dimensions, isotropic spacing,
/// world origin. Voxel data itself stays with the numeric collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub dims: [u32; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl VolumeGeometry {
    pub fn voxel_count(&self) -> usize {
        self.dims[0] as usize * self.dims[1] as usize * self.dims[2] as usize
    }

    /// Linear index of voxel (i, j, k); `None` when out of bounds.
    pub fn linear_index(&self, i: i64, j: i64, k: i64) -> Option<u32> {
        if i < 0 || j < 0 || k < 0 {
            return None;
        }
        let (i, j, k) = (i as u32, j as u32, k as u32);
        if i >= self.dims[0] || j >= self.dims[1] || k >= self.dims[2] {
            return None;
        }
        Some((k * self.dims[1] + j) * self.dims[0] + i)
    }

    /// World position → continuous voxel coordinates.
    pub fn world_to_voxel(&self, p: [f64; 3]) -> [f64; 3] {
        [
            (p[0] - self.origin[0]) / self.spacing[0],
            (p[1] - self.origin[1]) / self.spacing[1],
            (p[2] - self.origin[2]) / self.spacing[2],
        ]
    }
}

// ── Volume mask ───────────────────────────────────────────────────────────────

/// Binary region-of-interest mask over the reconstruction volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMask {
    pub geometry: VolumeGeometry,
    pub data: Vec<u8>,
}

impl VolumeMask {
    pub fn new(geometry: VolumeGeometry, data: Vec<u8>) -> Result<Self, TypesError> {
        let expected = geometry.voxel_count();
        if data.len() != expected {
            return Err(TypesError::MaskMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { geometry, data })
    }

    /// Mask covering the whole volume.
    pub fn full(geometry: VolumeGeometry) -> Self {
        let data = vec![1u8; geometry.voxel_count()];
        Self { geometry, data }
    }

    pub fn contains(&self, voxel: u32) -> bool {
        self.data.get(voxel as usize).is_some_and(|&v| v != 0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(x: u32, y: u32) -> ImageAttributes {
        ImageAttributes {
            x,
            y,
            dx: 1.0,
            dy: 1.0,
            dz: 2.0,
            origin: [0.0, 0.0, 0.0],
            thickness: 4.0,
        }
    }

    #[test]
    fn slice_validates_buffer_length() {
        assert!(Slice::new(attrs(4, 4), vec![0.0; 16]).is_ok());
        let err = Slice::new(attrs(4, 4), vec![0.0; 15]).unwrap_err();
        assert!(matches!(err, TypesError::PixelBufferMismatch { actual: 15, .. }));
    }

    #[test]
    fn slice_intensity_range() {
        let s = Slice::new(attrs(2, 2), vec![3.0, -1.0, 7.5, 0.0]).unwrap();
        assert_eq!(s.min_intensity, -1.0);
        assert_eq!(s.max_intensity, 7.5);
        assert_eq!(s.at(0, 1), 7.5);
    }

    #[test]
    fn identity_transform_is_noop() {
        let t = RigidTransform::identity();
        assert_eq!(t.apply([1.5, -2.0, 3.0]), [1.5, -2.0, 3.0]);
    }

    #[test]
    fn transform_translates() {
        let mut t = RigidTransform::identity();
        t.translation = [1.0, 2.0, 3.0];
        assert_eq!(t.apply([0.0, 0.0, 0.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn linear_index_bounds() {
        let g = VolumeGeometry {
            dims: [4, 4, 4],
            spacing: [1.0; 3],
            origin: [0.0; 3],
        };
        assert_eq!(g.linear_index(0, 0, 0), Some(0));
        assert_eq!(g.linear_index(3, 3, 3), Some(63));
        assert_eq!(g.linear_index(4, 0, 0), None);
        assert_eq!(g.linear_index(-1, 0, 0), None);
        assert_eq!(g.voxel_count(), 64);
    }

    #[test]
    fn mask_length_checked() {
        let g = VolumeGeometry {
            dims: [2, 2, 2],
            spacing: [1.0; 3],
            origin: [0.0; 3],
        };
        assert!(VolumeMask::new(g, vec![1; 8]).is_ok());
        assert!(VolumeMask::new(g, vec![1; 7]).is_err());

        let full = VolumeMask::full(g);
        assert!(full.contains(0));
        assert!(full.contains(7));
        assert!(!full.contains(8)); // out of range
    }
}
