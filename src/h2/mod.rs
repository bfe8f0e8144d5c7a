//! HTTP/2 multiplexed connection (spec.md SS4.5).
//!
//! Submodules, leaves first: wire framing (`frame`), header compression
//! (`hpack`/`huffman`), per-stream/connection flow control
//! (`flow_control`), PING/keep-alive timing (`ping`), the negotiated
//! SETTINGS set (`settings`), per-stream state (`stream`), and the
//! connection itself (`connection`), which owns a reader thread and
//! dispatches frames to streams.

pub mod connection;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub(crate) mod huffman;
pub mod ping;
pub mod settings;
pub mod stream;

pub use connection::{pairs_to_headers, H2Connection};
