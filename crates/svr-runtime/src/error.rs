use svr_types::{EbbId, NodeId, RequestId};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("provisioning error: {0}")]
    Provisioning(String),

    #[error("node pool not yet resolved")]
    PoolNotReady,

    #[error("node index {index} out of range (pool of {count})")]
    NodeIndexOutOfRange { index: usize, count: usize },

    #[error("unknown or already-fulfilled request: {0}")]
    UnknownRequest(RequestId),

    #[error("completion for {0} dropped before fulfillment")]
    CompletionDropped(RequestId),

    #[error("object {0} already constructed with a different type")]
    RegistryTypeMismatch(EbbId),

    #[error("handler already registered for {0}")]
    DuplicateRoute(EbbId),

    #[error("no handler registered for {0}")]
    UnroutableObject(EbbId),

    #[error("node {0} unreachable")]
    Unreachable(NodeId),

    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Wire(#[from] svr_wire::WireError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
