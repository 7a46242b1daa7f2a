//! Per-type encode/decode for bulk payloads.
//!
//! Layouts (little-endian throughout):
//!
//! ```text
//! Slice:      [x u32][y u32][dx dy dz f64×3][origin f64×3][thickness f64]
//!             [min f32][max f32][x·y × pixel f32]
//! Transform:  [rotation f64×9 row-major][translation f64×3]
//! Geometry:   [dims u32×3][spacing f64×3][origin f64×3]
//! Mask:       [present u8][voxel_count × u8]          (count from geometry)
//! Coeffs:     [count u32][count × ([voxel u32][weight f64])]
//! Vec<T>:     [count u32][count × T]
//! ```
//!
//! Count-prefixed collections read exactly N elements and leave the cursor at
//! the first unread byte; a short buffer fails the whole decode.

use svr_types::{
    ImageAttributes, RigidTransform, Slice, SliceCoefficients, VolumeGeometry, VoxelCoefficient,
};

use crate::cursor::{WireReader, WireWriter};
use crate::error::{Result, WireError};

/// Safety limit on a single decoded pixel buffer (64M pixels ≈ 256 MiB f32).
const MAX_PIXELS: u64 = 64 * 1024 * 1024;

/// Safety limit on a single decoded coefficient list.
const MAX_COEFFS: u32 = 256 * 1024 * 1024 / 12;

// ── Slice ─────────────────────────────────────────────────────────────────────

pub fn encode_slice(w: &mut WireWriter, slice: &Slice) {
    let a = &slice.attrs;
    w.put_u32(a.x);
    w.put_u32(a.y);
    w.put_f64(a.dx);
    w.put_f64(a.dy);
    w.put_f64(a.dz);
    for &o in &a.origin {
        w.put_f64(o);
    }
    w.put_f64(a.thickness);
    w.put_f32(slice.min_intensity);
    w.put_f32(slice.max_intensity);
    for &p in &slice.data {
        w.put_f32(p);
    }
}

pub fn decode_slice(r: &mut WireReader<'_>) -> Result<Slice> {
    let x = r.read_u32()?;
    let y = r.read_u32()?;
    let dx = r.read_f64()?;
    let dy = r.read_f64()?;
    let dz = r.read_f64()?;
    let origin = [r.read_f64()?, r.read_f64()?, r.read_f64()?];
    let thickness = r.read_f64()?;
    let min_intensity = r.read_f32()?;
    let max_intensity = r.read_f32()?;

    let pixels = u64::from(x) * u64::from(y);
    if pixels > MAX_PIXELS {
        return Err(WireError::Invalid(format!(
            "slice of {x}×{y} pixels exceeds the {MAX_PIXELS}-pixel limit"
        )));
    }
    // The claimed count must be backed by payload bytes before any buffer
    // is sized from it.
    let need = pixels as usize * 4;
    if r.remaining() < need {
        return Err(WireError::Truncated {
            offset: r.position(),
            need,
            have: r.remaining(),
        });
    }
    let mut data = Vec::with_capacity(pixels as usize);
    for _ in 0..pixels {
        data.push(r.read_f32()?);
    }

    let attrs = ImageAttributes {
        x,
        y,
        dx,
        dy,
        dz,
        origin,
        thickness,
    };
    let mut slice =
        Slice::new(attrs, data).map_err(|e| WireError::Invalid(e.to_string()))?;
    // Preserve the sender's statistics rather than re-deriving them.
    slice.min_intensity = min_intensity;
    slice.max_intensity = max_intensity;
    Ok(slice)
}

// ── Rigid transform ───────────────────────────────────────────────────────────

pub fn encode_transform(w: &mut WireWriter, t: &RigidTransform) {
    for row in &t.rotation {
        for &v in row {
            w.put_f64(v);
        }
    }
    for &v in &t.translation {
        w.put_f64(v);
    }
}

pub fn decode_transform(r: &mut WireReader<'_>) -> Result<RigidTransform> {
    let mut rotation = [[0.0f64; 3]; 3];
    for row in &mut rotation {
        for v in row.iter_mut() {
            *v = r.read_f64()?;
        }
    }
    let translation = [r.read_f64()?, r.read_f64()?, r.read_f64()?];
    Ok(RigidTransform {
        rotation,
        translation,
    })
}

// ── Volume geometry ───────────────────────────────────────────────────────────

pub fn encode_geometry(w: &mut WireWriter, g: &VolumeGeometry) {
    for &d in &g.dims {
        w.put_u32(d);
    }
    for &s in &g.spacing {
        w.put_f64(s);
    }
    for &o in &g.origin {
        w.put_f64(o);
    }
}

pub fn decode_geometry(r: &mut WireReader<'_>) -> Result<VolumeGeometry> {
    let dims = [r.read_u32()?, r.read_u32()?, r.read_u32()?];
    let spacing = [r.read_f64()?, r.read_f64()?, r.read_f64()?];
    let origin = [r.read_f64()?, r.read_f64()?, r.read_f64()?];
    Ok(VolumeGeometry {
        dims,
        spacing,
        origin,
    })
}

// ── Mask ──────────────────────────────────────────────────────────────────────

/// Mask voxel count is fixed by the geometry already on the wire, so only a
/// presence flag plus the raw bytes are encoded.
pub fn encode_mask(w: &mut WireWriter, mask: Option<&[u8]>) {
    match mask {
        Some(data) => {
            w.put_bool(true);
            w.put_bytes(data);
        }
        None => w.put_bool(false),
    }
}

pub fn decode_mask(r: &mut WireReader<'_>, voxel_count: usize) -> Result<Option<Vec<u8>>> {
    if r.read_bool()? {
        Ok(Some(r.read_bytes(voxel_count)?.to_vec()))
    } else {
        Ok(None)
    }
}

// ── Coefficients ──────────────────────────────────────────────────────────────

pub fn encode_coeffs(w: &mut WireWriter, sc: &SliceCoefficients) {
    w.put_u32(sc.coeffs.len() as u32);
    for c in &sc.coeffs {
        w.put_u32(c.voxel);
        w.put_f64(c.weight);
    }
}

pub fn decode_coeffs(r: &mut WireReader<'_>) -> Result<SliceCoefficients> {
    let count = r.read_u32()?;
    if count > MAX_COEFFS {
        return Err(WireError::Invalid(format!(
            "coefficient list of {count} entries exceeds the {MAX_COEFFS}-entry limit"
        )));
    }
    // 12 bytes per entry; reject a count the payload cannot back before
    // sizing any buffer from it.
    let need = count as usize * 12;
    if r.remaining() < need {
        return Err(WireError::Truncated {
            offset: r.position(),
            need,
            have: r.remaining(),
        });
    }
    let mut coeffs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let voxel = r.read_u32()?;
        let weight = r.read_f64()?;
        coeffs.push(VoxelCoefficient { voxel, weight });
    }
    Ok(SliceCoefficients { coeffs })
}

pub fn encode_coeffs_vec(w: &mut WireWriter, v: &[SliceCoefficients]) {
    w.put_u32(v.len() as u32);
    for sc in v {
        encode_coeffs(w, sc);
    }
}

pub fn decode_coeffs_vec(r: &mut WireReader<'_>) -> Result<Vec<SliceCoefficients>> {
    let count = r.read_u32()?;
    let mut v = Vec::with_capacity(count.min(MAX_COEFFS) as usize);
    for _ in 0..count {
        v.push(decode_coeffs(r)?);
    }
    Ok(v)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
