#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated buffer at offset {offset}: need {need} bytes, have {have}")]
    Truncated {
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("{remaining} trailing bytes after decode")]
    TrailingBytes { remaining: usize },

    #[error("unknown operation tag: {0}")]
    UnknownTag(u32),

    #[error("frame shorter than operation tag")]
    MissingTag,

    #[error("control payload codec error: {0}")]
    Control(String),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, WireError>;
