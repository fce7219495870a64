//! Request routing: maps a fully received request to a file response,
//! redirect, 304, error page or configured push promises.

use crate::h2::server::Header;
use crate::h2::ErrorCode;
use crate::server::reactor::LoopCtx;
use crate::server::session::Session;
use crate::server::stream::{HeaderToken, ResponseBody, Stream};
use crate::server::SERVER_NAME;
use crate::util;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{error, warn};
use std::fs::File;
use std::io::{self, Write};
use std::time::UNIX_EPOCH;

const DEFAULT_HTML: &str = "index.html";

/// Requests carrying this query string are deliberately left
/// unanswered so clients can exercise their timeout handling.
const DO_NOT_RESPOND_QUERY: &str = "nghttpd_do_not_respond_to_req=yes";

/// Resolve and emit the response for a completed request.
pub(crate) fn prepare_response(
    session: &mut Session,
    ctx: &mut LoopCtx,
    stream_id: u32,
    allow_push: bool,
) {
    let (reqpath, if_modified_since) = {
        let Some(stream) = session.streams.get(&stream_id) else {
            return;
        };
        let Some(reqpath) = stream.header(HeaderToken::Path) else {
            if let Some(codec) = session.codec.as_mut() {
                codec.submit_rst_stream(stream_id, ErrorCode::ProtocolError);
            }
            return;
        };
        (
            reqpath.to_string(),
            stream
                .header(HeaderToken::IfModifiedSince)
                .and_then(util::parse_http_date),
        )
    };

    let query_pos = reqpath.find('?');
    if let Some(pos) = query_pos {
        if reqpath[pos..].contains(DO_NOT_RESPOND_QUERY) {
            return;
        }
    }
    let url = match query_pos {
        Some(pos) => &reqpath[..pos],
        None => reqpath.as_str(),
    };
    let url = util::percent_decode(url);
    if !util::check_path(&url) {
        prepare_status_response(session, ctx, stream_id, "404");
        return;
    }

    if allow_push {
        if let Some(push_paths) = session.config.push.get(&url).cloned() {
            for push_path in push_paths {
                submit_push_promise(session, stream_id, &push_path);
            }
        }
    }

    let mut fs_path = session.config.htdocs.to_string_lossy().into_owned();
    fs_path.push_str(&url);
    if fs_path.ends_with('/') {
        fs_path.push_str(DEFAULT_HTML);
    }

    let file = match File::open(&fs_path) {
        Ok(file) => file,
        Err(_) => {
            prepare_status_response(session, ctx, stream_id, "404");
            return;
        }
    };
    let meta = match file.metadata() {
        Ok(meta) => meta,
        Err(_) => {
            prepare_status_response(session, ctx, stream_id, "404");
            return;
        }
    };

    if meta.is_dir() {
        drop(file);
        let redirect_path = redirect_with_slash(&reqpath, query_pos);
        prepare_redirect_response(session, ctx, stream_id, &redirect_path, "301");
        return;
    }

    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let file_len = meta.len();

    if let Some(stream) = session.streams.get_mut(&stream_id) {
        stream.body = Some(ResponseBody::File(file));
        stream.body_left = file_len as i64;
    }

    if let Some(since) = if_modified_since {
        if mtime <= since {
            prepare_status_response(session, ctx, stream_id, "304");
            return;
        }
    }

    submit_file_response(session, ctx, stream_id, mtime, file_len);
}

/// `/dir` becomes `/dir/`, keeping any query string in place.
fn redirect_with_slash(reqpath: &str, query_pos: Option<usize>) -> String {
    match query_pos {
        None => format!("{}/", reqpath),
        Some(pos) => {
            let mut path = reqpath.to_string();
            path.insert(pos, '/');
            path
        }
    }
}

fn trailer_config(session: &Session) -> Option<Vec<Header>> {
    if session.config.trailer.is_empty() {
        None
    } else {
        Some(session.config.trailer.clone())
    }
}

fn trailer_names(trailers: &[Header]) -> String {
    let mut names = String::new();
    for (i, (name, _)) in trailers.iter().enumerate() {
        if i > 0 {
            names.push_str(", ");
        }
        names.push_str(name);
    }
    names
}

fn submit_file_response(
    session: &mut Session,
    ctx: &mut LoopCtx,
    stream_id: u32,
    mtime: i64,
    file_len: u64,
) {
    let mut headers: Vec<Header> = vec![
        (":status".into(), "200".into()),
        ("server".into(), SERVER_NAME.into()),
        ("content-length".into(), file_len.to_string()),
        ("cache-control".into(), "max-age=3600".into()),
        ("date".into(), ctx.date.get().to_string()),
    ];
    if mtime != 0 {
        headers.push(("last-modified".into(), util::http_date(mtime)));
    }
    let trailers = trailer_config(session);
    if let Some(trailers) = &trailers {
        headers.push(("trailer".into(), trailer_names(trailers)));
    }
    if let Some(codec) = session.codec.as_mut() {
        if let Err(e) = codec.submit_response(stream_id, &headers, true, trailers) {
            error!("[id={}] submit response failed: {}", session.session_id, e);
        }
    }
}

/// Error-page and 304 responses. Error pages carry a small HTML body;
/// a 304 carries nothing at all.
fn prepare_status_response(
    session: &mut Session,
    ctx: &mut LoopCtx,
    stream_id: u32,
    status: &str,
) {
    if status == "304" {
        let headers: Vec<Header> = vec![
            (":status".into(), "304".into()),
            ("server".into(), SERVER_NAME.into()),
        ];
        if let Some(codec) = session.codec.as_mut() {
            if let Err(e) = codec.submit_response(stream_id, &headers, false, None) {
                error!("[id={}] submit response failed: {}", session.session_id, e);
            }
        }
        return;
    }

    let body = error_page_body(status, session.config.port);
    let mut extra: Vec<Header> = Vec::new();
    let body_bytes = if session.config.error_gzip {
        match gzip(body.as_bytes()) {
            Ok(compressed) => {
                extra.push(("content-encoding".into(), "gzip".into()));
                compressed
            }
            Err(e) => {
                warn!("gzip of error body failed: {}", e);
                body.into_bytes()
            }
        }
    } else {
        body.into_bytes()
    };
    extra.push(("content-type".into(), "text/html; charset=UTF-8".into()));

    let body_len = body_bytes.len() as i64;
    if let Some(stream) = session.streams.get_mut(&stream_id) {
        stream.body = Some(ResponseBody::Buf(Bytes::from(body_bytes)));
        stream.body_left = body_len;
    }

    let mut headers: Vec<Header> = vec![
        (":status".into(), status.into()),
        ("server".into(), SERVER_NAME.into()),
        ("date".into(), ctx.date.get().to_string()),
    ];
    headers.extend(extra);
    let trailers = trailer_config(session);
    if let Some(codec) = session.codec.as_mut() {
        if let Err(e) = codec.submit_response(stream_id, &headers, true, trailers) {
            error!("[id={}] submit response failed: {}", session.session_id, e);
        }
    }
}

fn prepare_redirect_response(
    session: &mut Session,
    ctx: &mut LoopCtx,
    stream_id: u32,
    path: &str,
    status: &str,
) {
    let location = {
        let Some(stream) = session.streams.get(&stream_id) else {
            return;
        };
        let scheme = stream
            .header(HeaderToken::Scheme)
            .unwrap_or(if session.config.no_tls { "http" } else { "https" });
        let authority = stream.authority().unwrap_or("");
        format!("{}://{}{}", scheme, authority, path)
    };

    let headers: Vec<Header> = vec![
        (":status".into(), status.into()),
        ("server".into(), SERVER_NAME.into()),
        ("date".into(), ctx.date.get().to_string()),
        ("location".into(), location),
    ];
    if let Some(codec) = session.codec.as_mut() {
        if let Err(e) = codec.submit_response(stream_id, &headers, false, None) {
            error!("[id={}] submit response failed: {}", session.session_id, e);
        }
    }
}

/// Reserve a promised stream carrying a synthesised GET for `push_path`
/// and record it in the session. Failures are logged, never fatal.
fn submit_push_promise(session: &mut Session, stream_id: u32, push_path: &str) {
    let Some(authority) = session
        .streams
        .get(&stream_id)
        .and_then(|s| s.authority())
        .map(str::to_string)
    else {
        return;
    };
    let scheme = if session.config.no_tls { "http" } else { "https" };
    let headers: Vec<Header> = vec![
        (":method".into(), "GET".into()),
        (":path".into(), push_path.into()),
        (":scheme".into(), scheme.into()),
        (":authority".into(), authority),
    ];

    let Some(codec) = session.codec.as_mut() else {
        return;
    };
    match codec.submit_push_promise(stream_id, &headers) {
        Ok(promised_stream_id) => {
            let mut promised = Stream::new(promised_stream_id);
            for (name, value) in headers {
                promised.add_header(name, value);
            }
            session.streams.insert(promised_stream_id, promised);
        }
        Err(e) => {
            error!(
                "[id={}] push promise for {} failed: {}",
                session.session_id, push_path, e
            );
        }
    }
}

fn error_page_body(status: &str, port: u16) -> String {
    format!(
        "<html><head><title>{status}</title></head><body><h1>{status}</h1>\
         <hr><address>{SERVER_NAME} at port {port}</address></body></html>"
    )
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_with_slash() {
        assert_eq!(redirect_with_slash("/sub", None), "/sub/");
        assert_eq!(redirect_with_slash("/sub?a=1", Some(4)), "/sub/?a=1");
    }

    #[test]
    fn test_error_page_body() {
        let body = error_page_body("404", 8080);
        assert!(body.contains("<h1>404</h1>"));
        assert!(body.contains("<title>404</title>"));
        assert!(body.contains(" at port 8080</address>"));
        assert!(body.contains(SERVER_NAME));
    }

    #[test]
    fn test_trailer_names() {
        let trailers = vec![
            ("digest".to_string(), "x".to_string()),
            ("x-trace".to_string(), "y".to_string()),
        ];
        assert_eq!(trailer_names(&trailers), "digest, x-trace");
    }

    #[test]
    fn test_gzip_round_trip() {
        let compressed = gzip(b"hello hello hello").unwrap();
        // Gzip magic number.
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, b"hello hello hello");
    }
}
