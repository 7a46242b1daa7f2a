use std::time::Duration;

use svr_runtime::RuntimeError;
use svr_types::TypesError;
use svr_wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("phase error: {0}")]
    Phase(String),

    #[error("coefficient-init reply not received within {0:?}")]
    PhaseTimeout(Duration),

    #[error("slice range {start}..{end} invalid for {len} slices")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("{count} transforms for {slices} slices")]
    TransformCountMismatch { count: usize, slices: usize },

    #[error("run inputs not set: {0}")]
    MissingInput(&'static str),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, EngineError>;
