//! HTTP/2 protocol engine.
//!
//! Frame types and wire codec (RFC 7540 Section 4/6), SETTINGS handling,
//! flow-control accounting and the buffer-driven server session
//! ([`server::ServerCodec`]) consumed by the connection layer. HPACK is
//! provided by the `hpack` crate.

pub mod codec;
pub mod error;
pub mod flow;
pub mod frames;
pub mod server;
pub mod settings;

pub use error::{CodecError, ErrorCode};
pub use frames::{FrameFlags, FrameType, RawFrame};
pub use server::{BodyRead, BodySource, RecvEvent, SendEvent, ServerCodec};
pub use settings::Settings;

/// HTTP/2 connection preface sent by clients (RFC 7540 Section 3.5).
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial flow-control window size.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest window size either side may reach (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;
