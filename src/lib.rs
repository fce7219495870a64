//! Event-driven HTTP/2 static file server.
//!
//! Serves a document root over cleartext (prior-knowledge) or TLS
//! (ALPN `h2`) HTTP/2. One cooperative reactor per worker thread hosts
//! sessions, per-stream inactivity timers and the accept handoff; the
//! protocol engine in [`h2`] is a buffer-driven codec the session layer
//! feeds from the socket.

pub mod config;
pub mod h2;
pub mod server;
pub mod tls;
pub mod util;

pub use config::Config;
pub use server::{HttpServer, ServerError, ShutdownHandle};
