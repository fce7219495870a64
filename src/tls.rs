//! Server TLS context construction.
//!
//! The context disables legacy protocol versions, compression and
//! tickets, prefers server cipher order, pins ECDH to P-256 and selects
//! `h2` via ALPN. Handshake progress and the read/write paths live in
//! the session layer, driven by `WANT_READ`/`WANT_WRITE`.

use crate::config::Config;
use log::{debug, info};
use openssl::dh::Dh;
use openssl::ssl::{
    select_next_proto, AlpnError, SslContext, SslContextBuilder, SslMethod, SslOptions,
    SslSessionCacheMode, SslVerifyMode,
};
use std::fs;
use std::path::Path;

/// ECDHE/DHE AEAD suites first, server-preferred.
const DEFAULT_CIPHER_LIST: &str =
    "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
     ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
     ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
     DHE-RSA-AES128-GCM-SHA256:DHE-RSA-AES256-GCM-SHA384:\
     HIGH:!aNULL:!eNULL:!MD5";

/// Wire identifier ALPN must select.
pub const ALPN_H2: &[u8] = b"h2";

/// Length-prefixed protocol list advertised by the server.
const ALPN_PROTOS: &[u8] = b"\x02h2";

const SESSION_ID_CONTEXT: &[u8] = b"nghttpd";

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS requires --private-key-file and --cert-file")]
    MissingMaterial,
}

/// Build the server context from the configured key material.
pub fn build_server_context(config: &Config) -> Result<SslContext, TlsError> {
    let key_file = config
        .private_key_file
        .as_deref()
        .ok_or(TlsError::MissingMaterial)?;
    let cert_file = config.cert_file.as_deref().ok_or(TlsError::MissingMaterial)?;

    let mut builder = SslContextBuilder::new(SslMethod::tls())?;
    builder.set_options(
        SslOptions::ALL
            | SslOptions::NO_SSLV2
            | SslOptions::NO_SSLV3
            | SslOptions::NO_COMPRESSION
            | SslOptions::NO_SESSION_RESUMPTION_ON_RENEGOTIATION
            | SslOptions::SINGLE_ECDH_USE
            | SslOptions::NO_TICKET
            | SslOptions::CIPHER_SERVER_PREFERENCE,
    );
    builder.set_cipher_list(DEFAULT_CIPHER_LIST)?;
    builder.set_session_id_context(SESSION_ID_CONTEXT)?;
    builder.set_session_cache_mode(SslSessionCacheMode::SERVER);

    // P-256 is cheap and sufficiently secure; auto-selection tends to
    // pick costlier curves.
    builder.set_groups_list("P-256")?;

    if let Some(path) = config.dh_param_file.as_deref() {
        let dh = load_dh_params(path)?;
        builder.set_tmp_dh(&dh)?;
    }

    builder.set_private_key_file(key_file, openssl::ssl::SslFiletype::PEM)?;
    builder.set_certificate_chain_file(cert_file)?;
    builder.check_private_key()?;

    if config.verify_client {
        // Client certificates are requested but never rejected.
        builder.set_verify_callback(
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            |_preverified, _ctx| true,
        );
    }

    let verbose = config.verbose;
    builder.set_alpn_select_callback(move |_ssl, client_protos| {
        if verbose {
            for proto in AlpnOffers(client_protos) {
                info!("[ALPN] client offers {}", String::from_utf8_lossy(proto));
            }
        }
        match select_next_proto(ALPN_PROTOS, client_protos) {
            Some(proto) => Ok(proto),
            None => {
                debug!("[ALPN] no overlap with h2");
                Err(AlpnError::NOACK)
            }
        }
    });

    Ok(builder.build())
}

fn load_dh_params(path: &Path) -> Result<Dh<openssl::pkey::Params>, TlsError> {
    let pem = fs::read(path)?;
    Ok(Dh::params_from_pem(&pem)?)
}

/// Iterator over a length-prefixed ALPN protocol list.
struct AlpnOffers<'a>(&'a [u8]);

impl<'a> Iterator for AlpnOffers<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let (&len, rest) = self.0.split_first()?;
        let len = len as usize;
        if len > rest.len() {
            self.0 = &[];
            return None;
        }
        let (proto, tail) = rest.split_at(len);
        self.0 = tail;
        Some(proto)
    }
}
