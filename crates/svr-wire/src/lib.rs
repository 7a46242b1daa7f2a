//! `svr-wire` — wire codec for the reconstruction substrate.
//!
//! Every message on the wire is `[u32 LE operation tag][payload]`. Control
//! payloads (parameter snapshots, handshakes) are bincode-encoded serde
//! structs; bulk payloads (slices, transforms, coefficient lists) use the
//! hand-rolled cursor codec in [`codec`], little-endian fixed-width
//! throughout.
//!
//! The codec is stateless and reentrant: any number of nodes may encode and
//! decode concurrently against independent buffers.

pub mod codec;
pub mod cursor;
pub mod error;
pub mod message;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use cursor::{WireReader, WireWriter};
pub use error::{Result, WireError};
pub use message::{
    decode_message, decode_payload, encode_message, CoeffInitRequest, CoeffShare, Message, OpTag,
};
