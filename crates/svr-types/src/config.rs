//! Runtime configuration structs. Plain values with defaults; the binary (or
//! embedding application) overrides what it needs.

use std::time::Duration;

// ── Runtime config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Buffer size of each node's inbound message channel. 256 slots absorbs
    /// a full phase fan-out without backpressure on the dispatcher.
    pub channel_capacity: usize,

    /// Default worker-thread count for backends that receive no explicit
    /// thread count in their parameters.
    pub worker_threads: u32,

    /// How long the coordinator waits for a backend's coefficient-init reply.
    ///
    /// `None` blocks indefinitely — a non-responding backend stalls the
    /// phase. `Some(d)` fails the phase after `d`. The original system had no
    /// timeout; this makes the policy explicit and configurable.
    pub request_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            worker_threads: 1,
            request_timeout: None,
        }
    }
}
