//! `svr-runtime` — the distributed-object substrate.
//!
//! This crate is a **coordination layer**, not a compute layer. It provides
//! the identity, lifecycle, and completion machinery the reconstruction
//! engine runs on:
//!
//! - [`registry`]   — addressable objects, materialized on first fault
//! - [`promise`]    — request-id ↔ completion correlation, at-most-once
//! - [`pool`]       — backend node provisioning and readiness
//! - [`dispatcher`] — inbound frame demux to per-object handlers
//! - [`transport`]  — frame delivery abstraction + in-process loopback router
//!
//! Process launching itself stays external: the pool allocator only drives a
//! [`NodeLauncher`] supplied by the embedding application.

pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod promise;
pub mod registry;
pub mod transport;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use dispatcher::{run_dispatch_loop, MessageDispatcher, MessageHandler};
pub use error::{Result, RuntimeError};
pub use pool::{NodeLauncher, PoolAllocator};
pub use promise::{Completion, PromiseMap};
pub use registry::{EbbAllocator, EbbRegistry};
pub use transport::{Envelope, LocalEndpoint, LocalRouter, Transport};
