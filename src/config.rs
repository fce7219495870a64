//! Server configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the server.
///
/// Defaults mirror a plain single-worker cleartext-capable setup: 60 second
/// per-stream inactivity timeouts, no padding, document root `./`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Read-inactivity timeout applied per request stream.
    pub stream_read_timeout: Duration,
    /// Write-inactivity timeout applied while a stream is blocked by flow
    /// control with body bytes still to send.
    pub stream_write_timeout: Duration,
    /// Extra padding bytes added to each DATA/HEADERS frame payload,
    /// capped by the frame's maximum payload.
    pub padding: usize,
    /// Number of worker reactors. 1 runs sessions inline on the
    /// listener's reactor.
    pub num_worker: usize,
    /// Advertised as SETTINGS_HEADER_TABLE_SIZE when set.
    pub header_table_size: Option<u32>,
    /// Listener port.
    pub port: u16,
    /// Listener address or hostname; `None` binds the wildcard addresses.
    pub address: Option<String>,
    /// Emit per-session trace output.
    pub verbose: bool,
    /// Request (but do not validate) client certificates.
    pub verify_client: bool,
    /// Serve HTTP/2 over cleartext with prior knowledge.
    pub no_tls: bool,
    /// Gzip-compress error response bodies.
    pub error_gzip: bool,
    /// Respond as soon as request headers arrive instead of waiting for
    /// the request body to finish.
    pub early_response: bool,
    /// Document root.
    pub htdocs: PathBuf,
    /// Request path -> paths to push-promise alongside the response.
    pub push: HashMap<String, Vec<String>>,
    /// Trailer header fields appended after each response body.
    pub trailer: Vec<(String, String)>,
    /// Optional DH parameter PEM file for TLS.
    pub dh_param_file: Option<PathBuf>,
    /// TLS private key (PEM).
    pub private_key_file: Option<PathBuf>,
    /// TLS certificate chain (PEM).
    pub cert_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stream_read_timeout: Duration::from_secs(60),
            stream_write_timeout: Duration::from_secs(60),
            padding: 0,
            num_worker: 1,
            header_table_size: None,
            port: 0,
            address: None,
            verbose: false,
            verify_client: false,
            no_tls: false,
            error_gzip: false,
            early_response: false,
            htdocs: PathBuf::from("./"),
            push: HashMap::new(),
            trailer: Vec::new(),
            dh_param_file: None,
            private_key_file: None,
            cert_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stream_read_timeout, Duration::from_secs(60));
        assert_eq!(config.stream_write_timeout, Duration::from_secs(60));
        assert_eq!(config.num_worker, 1);
        assert_eq!(config.padding, 0);
        assert!(!config.no_tls);
        assert!(config.push.is_empty());
        assert!(config.trailer.is_empty());
    }
}
