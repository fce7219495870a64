//! Per-connection HTTP/2 session.
//!
//! A [`Session`] owns the transport (cleartext or TLS), the codec, the
//! outbound [`WriteBuffer`] and the request streams multiplexed on the
//! connection. The worker's reactor invokes [`Session::on_read`] and
//! [`Session::on_write`] on socket readiness; an `Err(Fatal)` return
//! tells it to tear the session down.

use crate::config::Config;
use crate::h2::server::{BodyRead, BodySource, SendChunk};
use crate::h2::{ErrorCode, RecvEvent, SendEvent, ServerCodec};
use crate::server::buffer::WriteBuffer;
use crate::server::reactor::{LoopCtx, TimerId, TimerKind, Timers};
use crate::server::router;
use crate::server::stream::{HeaderToken, Stream};
use crate::tls::ALPN_H2;
use bytes::{Buf, Bytes};
use log::{error, info};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use openssl::ssl::{ErrorCode as SslErrorCode, Ssl, SslContext, SslStream};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Time the client gets to acknowledge our SETTINGS.
const SETTINGS_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport drain chunk size for reads.
const READ_CHUNK: usize = 8192;

/// Marker for "destroy this session". The reason has already been
/// logged (or deliberately suppressed) where it occurred.
pub(crate) struct Fatal;

pub(crate) type SessionResult = Result<(), Fatal>;

enum TlsState {
    Handshaking,
    Ready,
}

/// Transport state: dispatch target for the read/write paths.
enum Transport {
    Clear(TcpStream),
    Tls {
        stream: SslStream<TcpStream>,
        state: TlsState,
    },
}

impl Transport {
    fn socket_mut(&mut self) -> &mut TcpStream {
        match self {
            Transport::Clear(socket) => socket,
            Transport::Tls { stream, .. } => stream.get_mut(),
        }
    }
}

enum Handshake {
    Done,
    WantRead,
    WantWrite,
    NotH2,
    Failed,
}

pub struct Session {
    pub(crate) session_id: i64,
    pub(crate) token: Token,
    transport: Transport,
    pub(crate) codec: Option<ServerCodec>,
    wb: WriteBuffer,
    /// Codec output that did not fit the write buffer; drained before
    /// any further codec send.
    pending: Bytes,
    pub(crate) streams: HashMap<u32, Stream>,
    settings_timer: Option<TimerId>,
    pub(crate) config: Arc<Config>,
    write_interest: bool,
}

impl Session {
    /// Wrap an accepted socket and register it for readability. TLS
    /// sessions start in the handshaking state.
    pub fn new(
        session_id: i64,
        token: Token,
        mut socket: TcpStream,
        tls: Option<&SslContext>,
        config: Arc<Config>,
        registry: &Registry,
    ) -> io::Result<Session> {
        let _ = socket.set_nodelay(true);
        registry.register(&mut socket, token, Interest::READABLE)?;

        let transport = match tls {
            None => Transport::Clear(socket),
            Some(ctx) => {
                let mut ssl =
                    Ssl::new(ctx).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                ssl.set_accept_state();
                let stream = SslStream::new(ssl, socket)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Transport::Tls {
                    stream,
                    state: TlsState::Handshaking,
                }
            }
        };

        Ok(Session {
            session_id,
            token,
            transport,
            codec: None,
            wb: WriteBuffer::new(),
            pending: Bytes::new(),
            streams: HashMap::new(),
            settings_timer: None,
            config,
            write_interest: false,
        })
    }

    /// Kick off protocol setup for cleartext sessions. TLS sessions wait
    /// for the first readable event instead.
    pub(crate) fn start(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        match self.transport {
            Transport::Clear(_) => self.on_connect(ctx),
            Transport::Tls { .. } => Ok(()),
        }
    }

    pub(crate) fn on_read(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        match &self.transport {
            Transport::Clear(_) => self.read_clear(ctx),
            Transport::Tls {
                state: TlsState::Handshaking,
                ..
            } => self.tls_handshake(ctx),
            Transport::Tls { .. } => self.read_tls(ctx),
        }
    }

    pub(crate) fn on_write(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        match &self.transport {
            Transport::Clear(_) => self.write_clear(ctx),
            Transport::Tls {
                state: TlsState::Handshaking,
                ..
            } => self.tls_handshake(ctx),
            Transport::Tls { .. } => self.write_tls(ctx),
        }
    }

    /// Create the codec, announce our settings and flush the greeting.
    fn on_connect(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        let mut codec = ServerCodec::new(self.config.padding);
        let entries = ServerCodec::initial_settings(self.config.header_table_size);
        if codec.submit_settings(&entries).is_err() {
            return Err(Fatal);
        }
        self.codec = Some(codec);
        self.settings_timer = Some(ctx.timers.arm(
            TimerKind::SettingsAck { token: self.token },
            SETTINGS_ACK_TIMEOUT,
        ));
        self.on_write(ctx)
    }

    fn tls_handshake(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        self.set_write_interest(false, ctx.registry);

        let outcome = {
            let Transport::Tls { stream, .. } = &mut self.transport else {
                return Err(Fatal);
            };
            match stream.do_handshake() {
                Ok(()) => match stream.ssl().selected_alpn_protocol() {
                    Some(proto) if proto == ALPN_H2 => Handshake::Done,
                    _ => Handshake::NotH2,
                },
                Err(e) => match e.code() {
                    SslErrorCode::WANT_READ => Handshake::WantRead,
                    SslErrorCode::WANT_WRITE => Handshake::WantWrite,
                    _ => Handshake::Failed,
                },
            }
        };

        match outcome {
            Handshake::WantRead => Ok(()),
            Handshake::WantWrite => {
                self.set_write_interest(true, ctx.registry);
                Ok(())
            }
            Handshake::Done => {
                if self.config.verbose {
                    info!("[id={}] TLS handshake completed, h2 negotiated", self.session_id);
                }
                if let Transport::Tls { state, .. } = &mut self.transport {
                    *state = TlsState::Ready;
                }
                self.on_connect(ctx)?;
                // The client's first bytes may already sit in OpenSSL's
                // buffers; with edge-triggered readiness they would
                // otherwise never surface again.
                self.read_tls(ctx)
            }
            Handshake::NotH2 => {
                if self.config.verbose {
                    info!("[id={}] client did not negotiate h2", self.session_id);
                }
                Err(Fatal)
            }
            Handshake::Failed => Err(Fatal),
        }
    }

    fn read_clear(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = {
                let Transport::Clear(socket) = &mut self.transport else {
                    return Err(Fatal);
                };
                match socket.read(&mut buf) {
                    Ok(0) => return Err(Fatal),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => return Err(Fatal),
                }
            };
            self.feed(&buf[..n], ctx)?;
        }
        self.on_write(ctx)
    }

    fn read_tls(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = {
                let Transport::Tls { stream, .. } = &mut self.transport else {
                    return Err(Fatal);
                };
                match stream.ssl_read(&mut buf) {
                    Ok(0) => return Err(Fatal),
                    Ok(n) => n,
                    Err(e) => match e.code() {
                        SslErrorCode::WANT_READ => break,
                        // WANT_WRITE mid-read means renegotiation, which
                        // is not supported.
                        _ => return Err(Fatal),
                    },
                }
            };
            self.feed(&buf[..n], ctx)?;
        }
        self.on_write(ctx)
    }

    fn feed(&mut self, data: &[u8], ctx: &mut LoopCtx) -> SessionResult {
        let events = {
            let Some(codec) = self.codec.as_mut() else {
                return Err(Fatal);
            };
            match codec.recv(data) {
                Ok(events) => events,
                Err(e) => {
                    if !e.is_silent() {
                        error!("[id={}] http/2 receive error: {}", self.session_id, e);
                    }
                    return Err(Fatal);
                }
            }
        };
        self.handle_recv_events(events, ctx)
    }

    fn write_clear(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        loop {
            if self.wb.rleft() > 0 {
                let result = {
                    let Transport::Clear(socket) = &mut self.transport else {
                        return Err(Fatal);
                    };
                    socket.write(self.wb.chunk())
                };
                match result {
                    Ok(n) => {
                        self.wb.drain(n);
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.set_write_interest(true, ctx.registry);
                        return Ok(());
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => return Err(Fatal),
                }
            }
            self.wb.reset();
            self.fill_wb(ctx)?;
            if self.wb.rleft() == 0 {
                break;
            }
        }
        self.finish_write(ctx)
    }

    fn write_tls(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        loop {
            if self.wb.rleft() > 0 {
                let result = {
                    let Transport::Tls { stream, .. } = &mut self.transport else {
                        return Err(Fatal);
                    };
                    stream.ssl_write(self.wb.chunk())
                };
                match result {
                    Ok(n) => {
                        self.wb.drain(n);
                        continue;
                    }
                    Err(e) => match e.code() {
                        SslErrorCode::WANT_WRITE => {
                            self.set_write_interest(true, ctx.registry);
                            return Ok(());
                        }
                        // WANT_READ mid-write means renegotiation.
                        _ => return Err(Fatal),
                    },
                }
            }
            self.wb.reset();
            self.fill_wb(ctx)?;
            if self.wb.rleft() == 0 {
                break;
            }
        }
        self.finish_write(ctx)
    }

    fn finish_write(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        self.set_write_interest(self.wb.rleft() > 0, ctx.registry);
        if let Some(codec) = &self.codec {
            // Nothing left to read or write: the normal close path.
            if !codec.want_read() && !codec.want_write() && self.wb.rleft() == 0 {
                return Err(Fatal);
            }
        }
        Ok(())
    }

    /// Move codec output into the write buffer: first the pending
    /// cursor, then fresh frames until the codec is dry or the buffer
    /// fills (the remainder parks in the cursor).
    fn fill_wb(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        if self.codec.is_none() {
            return Ok(());
        }
        if !self.pending.is_empty() {
            let n = self.wb.write(&self.pending);
            self.pending.advance(n);
            if !self.pending.is_empty() {
                return Ok(());
            }
        }
        loop {
            if self.wb.wleft() == 0 {
                break;
            }
            let chunk: SendChunk = {
                let codec = self.codec.as_mut().expect("codec present");
                let mut bodies = StreamBodies {
                    streams: &mut self.streams,
                    timers: &mut *ctx.timers,
                };
                match codec.send(&mut bodies) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        error!("[id={}] http/2 send error: {}", self.session_id, e);
                        return Err(Fatal);
                    }
                }
            };
            if chunk.is_empty() {
                break;
            }
            let n = self.wb.write(&chunk.data);
            if n < chunk.data.len() {
                self.pending = chunk.data.slice(n..);
            }
            self.handle_send_events(chunk.events, ctx)?;
            if !self.pending.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn handle_recv_events(
        &mut self,
        events: Vec<RecvEvent>,
        ctx: &mut LoopCtx,
    ) -> SessionResult {
        for event in events {
            match event {
                RecvEvent::Request {
                    stream_id,
                    headers,
                    end_stream,
                } => self.on_request(stream_id, headers, end_stream, ctx),
                RecvEvent::Data {
                    stream_id,
                    end_stream,
                    ..
                }
                | RecvEvent::Trailers {
                    stream_id,
                    end_stream,
                } => self.on_request_data(stream_id, end_stream, ctx),
                RecvEvent::SettingsAck => {
                    if let Some(id) = self.settings_timer.take() {
                        ctx.timers.cancel(id);
                    }
                }
                RecvEvent::Settings | RecvEvent::Ping => {}
                RecvEvent::Rst {
                    stream_id,
                    error_code,
                } => {
                    if self.config.verbose {
                        info!(
                            "[id={}] RST_STREAM stream_id={} {}",
                            self.session_id, stream_id, error_code
                        );
                    }
                }
                RecvEvent::GoAway { error_code } => {
                    if self.config.verbose {
                        info!("[id={}] GOAWAY {}", self.session_id, error_code);
                    }
                }
                RecvEvent::StreamClosed { stream_id } => self.close_stream(stream_id, ctx),
            }
        }
        Ok(())
    }

    fn on_request(
        &mut self,
        stream_id: u32,
        headers: Vec<(String, String)>,
        end_stream: bool,
        ctx: &mut LoopCtx,
    ) {
        let mut stream = Stream::new(stream_id);
        for (name, value) in headers {
            stream.add_header(name, value);
        }
        stream.arm_read_timer(ctx.timers, self.token, self.config.stream_read_timeout);

        let wants_continue = stream
            .header(HeaderToken::Expect)
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);

        if self.config.verbose {
            let path = stream.header(HeaderToken::Path).unwrap_or("-");
            info!(
                "[id={}] request stream_id={} path={}",
                self.session_id, stream_id, path
            );
        }
        self.streams.insert(stream_id, stream);

        if wants_continue {
            if let Some(codec) = self.codec.as_mut() {
                let _ = codec.submit_non_final_response(stream_id, "100");
            }
        }
        if self.config.early_response {
            router::prepare_response(self, ctx, stream_id, true);
        }
        if end_stream {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.stop_read_timer(ctx.timers);
            }
            if !self.config.early_response {
                router::prepare_response(self, ctx, stream_id, true);
            }
        }
    }

    /// Request body chunks are acknowledged but not stored.
    fn on_request_data(&mut self, stream_id: u32, end_stream: bool, ctx: &mut LoopCtx) {
        if end_stream {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.stop_read_timer(ctx.timers);
            }
            if !self.config.early_response {
                router::prepare_response(self, ctx, stream_id, true);
            }
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.arm_read_timer(ctx.timers, self.token, self.config.stream_read_timeout);
        }
    }

    fn handle_send_events(
        &mut self,
        events: Vec<SendEvent>,
        ctx: &mut LoopCtx,
    ) -> SessionResult {
        let token = self.token;
        let read_timeout = self.config.stream_read_timeout;
        let write_timeout = self.config.stream_write_timeout;
        for event in events {
            match event {
                SendEvent::FrameSent {
                    stream_id,
                    end_stream,
                    kind: _,
                } => {
                    let blocked = {
                        let codec = self.codec.as_ref().expect("codec present");
                        codec
                            .stream_remote_window(stream_id)
                            .min(codec.connection_remote_window())
                            <= 0
                    };
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        if end_stream {
                            stream.stop_write_timer(ctx.timers);
                        } else if blocked {
                            // Stalled by flow control: watch for the
                            // client to open the window.
                            stream.arm_read_timer_if_pending(ctx.timers, token, read_timeout);
                            stream.arm_write_timer(ctx.timers, token, write_timeout);
                        } else {
                            stream.arm_read_timer_if_pending(ctx.timers, token, read_timeout);
                            stream.stop_write_timer(ctx.timers);
                        }
                    }
                }
                SendEvent::PushPromiseSent {
                    stream_id,
                    promised_stream_id,
                } => {
                    // PUSH_PROMISE carries no flow-control signal; only
                    // DATA/HEADERS sends drive the write watchdog.
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.arm_read_timer_if_pending(ctx.timers, token, read_timeout);
                    }
                    router::prepare_response(self, ctx, promised_stream_id, false);
                }
                SendEvent::StreamClosed { stream_id } => self.close_stream(stream_id, ctx),
            }
        }
        Ok(())
    }

    fn close_stream(&mut self, stream_id: u32, ctx: &mut LoopCtx) {
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            stream.stop_timers(ctx.timers);
            if self.config.verbose {
                info!("[id={}] stream_id={} closed", self.session_id, stream_id);
            }
        }
    }

    /// A stream inactivity watchdog fired: abort just that stream.
    pub(crate) fn on_stream_timeout(&mut self, stream_id: u32, ctx: &mut LoopCtx) -> SessionResult {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.stop_timers(ctx.timers);
            if self.config.verbose {
                info!("[id={}] timeout stream_id={}", self.session_id, stream_id);
            }
            if let Some(codec) = self.codec.as_mut() {
                codec.submit_rst_stream(stream_id, ErrorCode::InternalError);
            }
        }
        self.on_write(ctx)
    }

    /// The client never acknowledged our SETTINGS.
    pub(crate) fn on_settings_timeout(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        if let Some(codec) = self.codec.as_mut() {
            codec.terminate(ErrorCode::SettingsTimeout);
        }
        self.on_write(ctx)
    }

    /// Ask the client to go away; used on server shutdown.
    pub(crate) fn initiate_shutdown(&mut self, ctx: &mut LoopCtx) -> SessionResult {
        match self.codec.as_mut() {
            Some(codec) => {
                codec.terminate(ErrorCode::NoError);
                self.on_write(ctx)
            }
            None => Err(Fatal),
        }
    }

    fn set_write_interest(&mut self, on: bool, registry: &Registry) {
        if self.write_interest == on {
            return;
        }
        self.write_interest = on;
        let interest = if on {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let token = self.token;
        let result = registry.reregister(self.transport.socket_mut(), token, interest);
        if let Err(e) = result {
            error!("[id={}] reregister failed: {}", self.session_id, e);
        }
    }

    /// Final cleanup before the session is dropped: stop timers, shut
    /// the TLS half down, deregister and half-close the socket.
    pub(crate) fn teardown(&mut self, timers: &mut Timers, registry: &Registry) {
        timers.cancel_session(self.token);
        if let Transport::Tls { stream, .. } = &mut self.transport {
            let _ = stream.shutdown();
        }
        let socket = self.transport.socket_mut();
        let _ = registry.deregister(socket);
        let _ = socket.shutdown(std::net::Shutdown::Write);
        if self.config.verbose {
            info!("[id={}] closed", self.session_id);
        }
    }
}

/// [`BodySource`] over the session's streams: reads body bytes with
/// EINTR retry and runs down `body_left`. Read failures stop both
/// stream timers; the codec resets the stream.
struct StreamBodies<'a> {
    streams: &'a mut HashMap<u32, Stream>,
    timers: &'a mut Timers,
}

impl BodySource for StreamBodies<'_> {
    fn pull(&mut self, stream_id: u32, buf: &mut [u8]) -> BodyRead {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return BodyRead::Error;
        };
        match stream.read_body(buf) {
            Err(e) => {
                error!("body read failed on stream {}: {}", stream_id, e);
                stream.stop_timers(self.timers);
                BodyRead::Error
            }
            Ok(n) => {
                stream.body_left -= n as i64;
                BodyRead::Data {
                    n,
                    eof: n == 0 || stream.body_left <= 0,
                }
            }
        }
    }
}
