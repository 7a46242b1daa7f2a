//! Parallel coefficient initialization on one backend.
//!
//! The slice range assigned to this node is split into contiguous
//! sub-ranges, one per worker thread, sized as evenly as possible. Each
//! worker writes results directly into its disjoint region of the
//! pre-sized output, so no two workers touch the same index and no locking
//! is needed on the results. The scope join is the barrier: the function
//! returns only after every worker has finished.
//!
//! Results are positioned by slice index, never by completion order — the
//! output for a given input is identical for any worker count.

use std::ops::Range;

use tracing::debug;

use svr_types::{CoeffInitParams, RigidTransform, Slice, SliceCoefficients, VolumeGeometry,
    VolumeMask};

use crate::error::{EngineError, Result};
use crate::model::CoefficientModel;

// ── Range splitting ───────────────────────────────────────────────────────────

/// Split `0..len` into `parts` contiguous ranges of near-equal length, the
/// remainder going to the first ranges. Empty ranges are returned when
/// `len < parts`; callers skip them.
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

/// Compute coefficients for slices `[start, end)` using `workers` threads.
///
/// Returns one [`SliceCoefficients`] per slice in the range, in slice order
/// (index `i` of the result corresponds to absolute slice `start + i`). An
/// empty range is a legal no-op and yields an empty vector.
#[allow(clippy::too_many_arguments)]
pub fn run_coeff_init(
    model: &dyn CoefficientModel,
    slices: &[Slice],
    transforms: &[RigidTransform],
    volume: &VolumeGeometry,
    mask: Option<&VolumeMask>,
    params: &CoeffInitParams,
    range: Range<usize>,
    workers: usize,
) -> Result<Vec<SliceCoefficients>> {
    let (start, end) = (range.start, range.end);
    if start > end || end > slices.len() {
        return Err(EngineError::InvalidRange {
            start,
            end,
            len: slices.len(),
        });
    }
    if transforms.len() != slices.len() {
        return Err(EngineError::TransformCountMismatch {
            count: transforms.len(),
            slices: slices.len(),
        });
    }

    let count = end - start;
    let mut out = vec![SliceCoefficients::default(); count];
    if count == 0 {
        return Ok(out);
    }

    let splits = split_ranges(count, workers);
    debug!(start, end, workers = splits.len(), "coefficient-init fan-out");

    std::thread::scope(|scope| {
        let mut rest: &mut [SliceCoefficients] = &mut out;
        for split in splits {
            if split.is_empty() {
                continue;
            }
            // Contiguous ascending splits, so peeling from the front keeps
            // each worker's region aligned with its slice indices.
            let (region, tail) = rest.split_at_mut(split.len());
            rest = tail;
            scope.spawn(move || {
                for (k, slot) in region.iter_mut().enumerate() {
                    let abs = start + split.start + k;
                    *slot = model.slice_coefficients(
                        &slices[abs],
                        &transforms[abs],
                        volume,
                        mask,
                        params,
                    );
                }
            });
        }
    });

    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
