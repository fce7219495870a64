//! Per-request stream state.

use crate::server::reactor::{TimerId, TimerKind, Timers};
use bytes::{Buf, Bytes};
use mio::Token;
use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

/// Header names with a fast-lookup slot in the stream's token index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HeaderToken {
    Method = 0,
    Path,
    Scheme,
    Authority,
    Host,
    IfModifiedSince,
    Expect,
}

const TOKEN_COUNT: usize = 7;

impl HeaderToken {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            ":method" => Some(HeaderToken::Method),
            ":path" => Some(HeaderToken::Path),
            ":scheme" => Some(HeaderToken::Scheme),
            ":authority" => Some(HeaderToken::Authority),
            "host" => Some(HeaderToken::Host),
            "if-modified-since" => Some(HeaderToken::IfModifiedSince),
            "expect" => Some(HeaderToken::Expect),
            _ => None,
        }
    }
}

/// Response body source: a file on disk or a synthesised in-memory page.
pub enum ResponseBody {
    File(File),
    Buf(Bytes),
}

/// One request/response exchange within a session.
pub struct Stream {
    pub stream_id: u32,
    /// Request headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Token -> index into `headers` for recognised names.
    hdidx: [Option<usize>; TOKEN_COUNT],
    pub body: Option<ResponseBody>,
    pub body_left: i64,
    pub read_timer: Option<TimerId>,
    pub write_timer: Option<TimerId>,
}

impl Stream {
    pub fn new(stream_id: u32) -> Self {
        Stream {
            stream_id,
            headers: Vec::with_capacity(10),
            hdidx: [None; TOKEN_COUNT],
            body: None,
            body_left: 0,
            read_timer: None,
            write_timer: None,
        }
    }

    /// Append a header, indexing recognised tokens.
    pub fn add_header(&mut self, name: String, value: String) {
        if let Some(token) = HeaderToken::lookup(&name) {
            self.hdidx[token as usize] = Some(self.headers.len());
        }
        self.headers.push((name, value));
    }

    /// Fast lookup of a recognised header.
    pub fn header(&self, token: HeaderToken) -> Option<&str> {
        self.hdidx[token as usize].map(|i| self.headers[i].1.as_str())
    }

    /// The request authority, falling back to the `host` header.
    pub fn authority(&self) -> Option<&str> {
        self.header(HeaderToken::Authority)
            .or_else(|| self.header(HeaderToken::Host))
    }

    /// Read response body bytes, retrying on EINTR. In-memory bodies
    /// never fail.
    pub fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            None => Ok(0),
            Some(ResponseBody::Buf(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.advance(n);
                Ok(n)
            }
            Some(ResponseBody::File(file)) => loop {
                match file.read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            },
        }
    }

    pub fn arm_read_timer(&mut self, timers: &mut Timers, token: Token, after: Duration) {
        if let Some(id) = self.read_timer.take() {
            timers.cancel(id);
        }
        self.read_timer = Some(timers.arm(
            TimerKind::StreamRead {
                token,
                stream_id: self.stream_id,
            },
            after,
        ));
    }

    /// Re-arm the read timer only if it is currently pending.
    pub fn arm_read_timer_if_pending(
        &mut self,
        timers: &mut Timers,
        token: Token,
        after: Duration,
    ) {
        if self.read_timer.is_some() {
            self.arm_read_timer(timers, token, after);
        }
    }

    pub fn stop_read_timer(&mut self, timers: &mut Timers) {
        if let Some(id) = self.read_timer.take() {
            timers.cancel(id);
        }
    }

    pub fn arm_write_timer(&mut self, timers: &mut Timers, token: Token, after: Duration) {
        if let Some(id) = self.write_timer.take() {
            timers.cancel(id);
        }
        self.write_timer = Some(timers.arm(
            TimerKind::StreamWrite {
                token,
                stream_id: self.stream_id,
            },
            after,
        ));
    }

    pub fn stop_write_timer(&mut self, timers: &mut Timers) {
        if let Some(id) = self.write_timer.take() {
            timers.cancel(id);
        }
    }

    /// Stop both watchdogs; must precede dropping the stream.
    pub fn stop_timers(&mut self, timers: &mut Timers) {
        self.stop_read_timer(timers);
        self.stop_write_timer(timers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lookup() {
        assert_eq!(HeaderToken::lookup(":path"), Some(HeaderToken::Path));
        assert_eq!(HeaderToken::lookup("host"), Some(HeaderToken::Host));
        assert_eq!(
            HeaderToken::lookup("if-modified-since"),
            Some(HeaderToken::IfModifiedSince)
        );
        assert_eq!(HeaderToken::lookup("content-type"), None);
    }

    #[test]
    fn test_header_index() {
        let mut stream = Stream::new(1);
        stream.add_header(":method".into(), "GET".into());
        stream.add_header(":path".into(), "/x".into());
        stream.add_header("accept".into(), "*/*".into());
        assert_eq!(stream.header(HeaderToken::Method), Some("GET"));
        assert_eq!(stream.header(HeaderToken::Path), Some("/x"));
        assert_eq!(stream.header(HeaderToken::Host), None);
        assert_eq!(stream.headers.len(), 3);
    }

    #[test]
    fn test_authority_falls_back_to_host() {
        let mut stream = Stream::new(1);
        stream.add_header("host".into(), "fallback:80".into());
        assert_eq!(stream.authority(), Some("fallback:80"));
        stream.add_header(":authority".into(), "primary:443".into());
        assert_eq!(stream.authority(), Some("primary:443"));
    }

    #[test]
    fn test_buffered_body_reads_out() {
        let mut stream = Stream::new(1);
        stream.body = Some(ResponseBody::Buf(Bytes::from_static(b"hello world")));
        stream.body_left = 11;
        let mut buf = [0u8; 8];
        assert_eq!(stream.read_body(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"hello wo");
        assert_eq!(stream.read_body(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"rld");
        assert_eq!(stream.read_body(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_timer_handles() {
        let mut timers = Timers::new();
        let mut stream = Stream::new(3);
        let token = Token(9);
        let after = Duration::from_secs(60);

        // if-pending is a no-op before the first arm.
        stream.arm_read_timer_if_pending(&mut timers, token, after);
        assert!(stream.read_timer.is_none());

        stream.arm_read_timer(&mut timers, token, after);
        assert!(stream.read_timer.is_some());
        stream.arm_read_timer_if_pending(&mut timers, token, after);
        assert!(stream.read_timer.is_some());

        stream.arm_write_timer(&mut timers, token, after);
        stream.stop_timers(&mut timers);
        assert!(stream.read_timer.is_none());
        assert!(stream.write_timer.is_none());
    }
}
