//! Identity newtypes shared across the substrate.
//!
//! Three distinct id spaces that must never be confused:
//! - [`EbbId`]   — a logical distributed object, materialized per process
//! - [`NodeId`]  — a reachable backend process, owned by the pool allocator
//! - [`RequestId`] — an in-flight distributed call, owned by a promise map

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of an addressable distributed object. Many processes may host a local
/// instance keyed by the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EbbId(pub u32);

impl fmt::Display for EbbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ebb:{}", self.0)
    }
}

/// Opaque handle to a provisioned backend node. Immutable once issued;
/// invalidated only on pool teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Correlates an outbound distributed call with its eventual completion.
/// Unique while in flight; reusable after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
