//! Validation errors for the shared data model.

#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("pixel buffer length {actual} does not match {x}×{y} dimensions")]
    PixelBufferMismatch { x: u32, y: u32, actual: usize },

    #[error("mask length {actual} does not match volume voxel count {expected}")]
    MaskMismatch { expected: usize, actual: usize },
}
