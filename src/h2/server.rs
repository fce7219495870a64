//! Buffer-driven HTTP/2 server session.
//!
//! [`ServerCodec`] owns all protocol state for one connection: the frame
//! decoder, HPACK contexts, per-stream flow-control windows and the
//! outbound frame queue. The transport layer feeds received bytes into
//! [`ServerCodec::recv`] and drains serialised frames from
//! [`ServerCodec::send`]; both return typed events instead of callbacks.
//! Response bodies are pulled through the [`BodySource`] trait at send
//! time, bounded by the peer's flow-control windows.

use super::codec::FrameDecoder;
use super::error::{CodecError, ErrorCode, Result};
use super::frames::{self, FrameType, RawFrame};
use super::flow::Window;
use super::settings::{Settings, SETTINGS_HEADER_TABLE_SIZE, SETTINGS_MAX_CONCURRENT_STREAMS};
use super::{CLIENT_PREFACE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// A decoded header field.
pub type Header = (String, String);

/// Events produced while consuming received bytes.
#[derive(Debug)]
pub enum RecvEvent {
    /// A request HEADERS block completed on a new stream.
    Request {
        stream_id: u32,
        headers: Vec<Header>,
        end_stream: bool,
    },
    /// A trailing HEADERS block arrived on an open request stream.
    Trailers { stream_id: u32, end_stream: bool },
    /// A DATA frame arrived; `len` counts body bytes after padding.
    Data {
        stream_id: u32,
        len: usize,
        end_stream: bool,
    },
    /// The peer acknowledged our SETTINGS.
    SettingsAck,
    /// The peer sent (non-ACK) SETTINGS; already applied and acknowledged.
    Settings,
    /// The peer pinged; the acknowledgement is already queued.
    Ping,
    /// The peer reset a stream.
    Rst { stream_id: u32, error_code: ErrorCode },
    /// The peer is going away.
    GoAway { error_code: ErrorCode },
    /// A stream is fully closed and its state dropped.
    StreamClosed { stream_id: u32 },
}

/// Frame kinds reported by [`SendEvent::FrameSent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentFrame {
    Data,
    Headers,
}

/// Events attached to serialised output chunks.
#[derive(Debug)]
pub enum SendEvent {
    /// A DATA or HEADERS frame for this stream went out.
    FrameSent {
        stream_id: u32,
        kind: SentFrame,
        end_stream: bool,
    },
    /// A PUSH_PROMISE for `promised_stream_id` went out on `stream_id`.
    PushPromiseSent {
        stream_id: u32,
        promised_stream_id: u32,
    },
    /// A stream is fully closed and its state dropped.
    StreamClosed { stream_id: u32 },
}

/// Result of pulling response body bytes.
#[derive(Debug, Clone, Copy)]
pub enum BodyRead {
    Data { n: usize, eof: bool },
    /// Reading failed; the codec resets the stream.
    Error,
}

/// Pull-based response body provider, invoked from [`ServerCodec::send`]
/// when a DATA frame can be emitted for a stream.
pub trait BodySource {
    fn pull(&mut self, stream_id: u32, buf: &mut [u8]) -> BodyRead;
}

/// One chunk of serialised output plus the events it carries.
#[derive(Debug, Default)]
pub struct SendChunk {
    pub data: Bytes,
    pub events: Vec<SendEvent>,
}

impl SendChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug)]
struct StreamEntry {
    send_window: Window,
    recv_window: Window,
    local_closed: bool,
    remote_closed: bool,
    has_body: bool,
    /// Stream currently sits in the data round-robin queue.
    queued: bool,
    trailers: Option<Vec<Header>>,
}

impl StreamEntry {
    fn new(send_initial: u32, recv_initial: u32) -> Self {
        StreamEntry {
            send_window: Window::new(send_initial),
            recv_window: Window::new(recv_initial),
            local_closed: false,
            remote_closed: false,
            has_body: false,
            queued: false,
            trailers: None,
        }
    }
}

enum AccumKind {
    Request,
    Trailers,
    /// Header block on an already-gone stream; decoded for HPACK state
    /// only.
    Discard,
}

struct HeaderAccum {
    stream_id: u32,
    end_stream: bool,
    fragment: BytesMut,
    kind: AccumKind,
}

/// Server-side HTTP/2 session engine.
pub struct ServerCodec {
    decoder: FrameDecoder,
    preface_left: usize,
    hpack_dec: hpack::Decoder<'static>,
    hpack_enc: hpack::Encoder<'static>,
    streams: HashMap<u32, StreamEntry>,
    accum: Option<HeaderAccum>,
    last_client_stream: u32,
    next_promised: u32,
    local_settings: Settings,
    remote_settings: Settings,
    conn_send_window: Window,
    conn_recv_window: Window,
    /// Serialised frames waiting for the write buffer, paired with the
    /// events to deliver once each goes out.
    outq: VecDeque<(Bytes, Vec<SendEvent>)>,
    /// Round-robin queue of streams with body bytes to send.
    data_queue: VecDeque<u32>,
    sent_goaway: bool,
    padding: usize,
}

impl ServerCodec {
    pub fn new(padding: usize) -> Self {
        ServerCodec {
            decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE),
            preface_left: CLIENT_PREFACE.len(),
            hpack_dec: hpack::Decoder::new(),
            hpack_enc: hpack::Encoder::new(),
            streams: HashMap::new(),
            accum: None,
            last_client_stream: 0,
            next_promised: 2,
            local_settings: Settings::default(),
            remote_settings: Settings::default(),
            conn_send_window: Window::new(super::DEFAULT_INITIAL_WINDOW_SIZE),
            conn_recv_window: Window::new(super::DEFAULT_INITIAL_WINDOW_SIZE),
            outq: VecDeque::new(),
            data_queue: VecDeque::new(),
            sent_goaway: false,
            padding,
        }
    }

    /// Queue the server's initial SETTINGS. Entries also update our
    /// local settings so enforcement matches what was advertised.
    pub fn submit_settings(&mut self, entries: &[(u16, u32)]) -> Result<()> {
        for &(id, value) in entries {
            self.local_settings.apply(id, value)?;
        }
        self.outq.push_back((frames::encode_settings(entries), Vec::new()));
        Ok(())
    }

    /// Queue response headers. `headers` must lead with `:status`. With
    /// `has_body` the stream joins the data queue and `trailers` (if any)
    /// go out as a trailing HEADERS with END_STREAM after body EOF.
    pub fn submit_response(
        &mut self,
        stream_id: u32,
        headers: &[Header],
        has_body: bool,
        trailers: Option<Vec<Header>>,
    ) -> Result<()> {
        let block = self.encode_block(headers);
        let pad = self.frame_padding();
        let max_frame = self.remote_settings.max_frame_size as usize;
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(CodecError::StreamClosed(stream_id))?;
        let end_stream = !has_body;
        let wire = frames::encode_headers(stream_id, &block, end_stream, pad, max_frame);

        let mut events = vec![SendEvent::FrameSent {
            stream_id,
            kind: SentFrame::Headers,
            end_stream,
        }];
        if has_body {
            stream.has_body = true;
            stream.trailers = trailers;
            if !stream.queued {
                stream.queued = true;
                self.data_queue.push_back(stream_id);
            }
        } else {
            stream.local_closed = true;
            if stream.remote_closed {
                self.streams.remove(&stream_id);
                events.push(SendEvent::StreamClosed { stream_id });
            }
        }
        self.outq.push_back((wire, events));
        Ok(())
    }

    /// Queue a non-final (1xx) response: a HEADERS frame that leaves the
    /// stream open for the real response.
    pub fn submit_non_final_response(&mut self, stream_id: u32, status: &str) -> Result<()> {
        if !self.streams.contains_key(&stream_id) {
            return Err(CodecError::StreamClosed(stream_id));
        }
        let headers = [(":status".to_string(), status.to_string())];
        let block = self.encode_block(&headers);
        let pad = self.frame_padding();
        let max_frame = self.remote_settings.max_frame_size as usize;
        let wire = frames::encode_headers(stream_id, &block, false, pad, max_frame);
        self.outq.push_back((
            wire,
            vec![SendEvent::FrameSent {
                stream_id,
                kind: SentFrame::Headers,
                end_stream: false,
            }],
        ));
        Ok(())
    }

    /// Reserve a promised stream and queue the PUSH_PROMISE carrying the
    /// synthesised request headers. Returns the promised stream id.
    pub fn submit_push_promise(&mut self, stream_id: u32, headers: &[Header]) -> Result<u32> {
        if self.sent_goaway {
            return Err(CodecError::Terminated);
        }
        if !self.remote_settings.enable_push {
            return Err(CodecError::Protocol("peer disabled push"));
        }
        if !self.streams.contains_key(&stream_id) {
            return Err(CodecError::StreamClosed(stream_id));
        }
        let promised = self.next_promised;
        self.next_promised += 2;

        let mut entry = StreamEntry::new(
            self.remote_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        // The peer never sends on a pushed stream.
        entry.remote_closed = true;
        self.streams.insert(promised, entry);

        let block = self.encode_block(headers);
        let wire = frames::encode_push_promise(stream_id, promised, &block);
        self.outq.push_back((
            wire,
            vec![SendEvent::PushPromiseSent {
                stream_id,
                promised_stream_id: promised,
            }],
        ));
        Ok(promised)
    }

    /// Queue RST_STREAM and drop the stream's codec state.
    pub fn submit_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) {
        if self.streams.remove(&stream_id).is_none() {
            return;
        }
        self.outq.push_back((
            frames::encode_rst_stream(stream_id, error_code),
            vec![SendEvent::StreamClosed { stream_id }],
        ));
    }

    /// Queue GOAWAY. The session stops wanting reads once this is set.
    pub fn terminate(&mut self, error_code: ErrorCode) {
        if self.sent_goaway {
            return;
        }
        self.sent_goaway = true;
        self.outq.push_back((
            frames::encode_goaway(self.last_client_stream, error_code),
            Vec::new(),
        ));
    }

    pub fn want_read(&self) -> bool {
        !self.sent_goaway
    }

    pub fn want_write(&self) -> bool {
        !self.outq.is_empty() || !self.data_queue.is_empty()
    }

    /// The peer's remaining window for a stream; 0 for unknown streams.
    pub fn stream_remote_window(&self, stream_id: u32) -> i64 {
        self.streams
            .get(&stream_id)
            .map(|s| s.send_window.available())
            .unwrap_or(0)
    }

    pub fn connection_remote_window(&self) -> i64 {
        self.conn_send_window.available()
    }

    pub fn stream_remote_closed(&self, stream_id: u32) -> bool {
        self.streams
            .get(&stream_id)
            .map(|s| s.remote_closed)
            .unwrap_or(true)
    }

    fn encode_block(&mut self, headers: &[Header]) -> Vec<u8> {
        self.hpack_enc
            .encode(headers.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())))
    }

    fn frame_padding(&self) -> u8 {
        self.padding.min(255) as u8
    }

    /// Consume received bytes: the client preface first, frames after.
    pub fn recv(&mut self, mut data: &[u8]) -> Result<Vec<RecvEvent>> {
        if self.preface_left > 0 {
            let offset = CLIENT_PREFACE.len() - self.preface_left;
            let n = self.preface_left.min(data.len());
            if data[..n] != CLIENT_PREFACE[offset..offset + n] {
                return Err(CodecError::BadPreface);
            }
            self.preface_left -= n;
            data = &data[n..];
        }

        self.decoder.feed(data);
        let mut events = Vec::new();
        while let Some(frame) = self.decoder.next_frame()? {
            self.handle_frame(frame, &mut events)?;
        }
        Ok(events)
    }

    fn handle_frame(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if self.accum.is_some() {
            // Header blocks are contiguous (RFC 7540 Section 4.3).
            let ok = frame.kind == Some(FrameType::Continuation)
                && frame.stream_id == self.accum.as_ref().map(|a| a.stream_id).unwrap_or(0);
            if !ok {
                return Err(CodecError::Protocol("expected CONTINUATION"));
            }
        }

        let Some(kind) = frame.kind else {
            debug!("ignoring unknown frame type on stream {}", frame.stream_id);
            return Ok(());
        };

        match kind {
            FrameType::Settings => self.on_settings(frame, events),
            FrameType::Ping => self.on_ping(frame, events),
            FrameType::Headers => self.on_headers(frame, events),
            FrameType::Continuation => self.on_continuation(frame, events),
            FrameType::Data => self.on_data(frame, events),
            FrameType::RstStream => self.on_rst_stream(frame, events),
            FrameType::WindowUpdate => self.on_window_update(frame),
            FrameType::Goaway => {
                if frame.payload.len() < 8 {
                    return Err(CodecError::FrameSize(frame.payload.len()));
                }
                events.push(RecvEvent::GoAway {
                    error_code: frames::parse_error_code(&frame.payload[4..8]),
                });
                Ok(())
            }
            FrameType::Priority => Ok(()),
            FrameType::PushPromise => Err(CodecError::Protocol("PUSH_PROMISE from client")),
        }
    }

    fn on_settings(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if frame.stream_id != 0 {
            return Err(CodecError::Protocol("SETTINGS on a stream"));
        }
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(CodecError::FrameSize(frame.payload.len()));
            }
            events.push(RecvEvent::SettingsAck);
            return Ok(());
        }
        let old_initial = self.remote_settings.initial_window_size;
        for (id, value) in frames::parse_settings(&frame.payload)? {
            self.remote_settings.apply(id, value)?;
        }
        let new_initial = self.remote_settings.initial_window_size;
        if new_initial != old_initial {
            for stream in self.streams.values_mut() {
                stream.send_window.rebase(old_initial, new_initial);
            }
        }
        self.outq.push_back((frames::encode_settings_ack(), Vec::new()));
        self.requeue_sendable();
        events.push(RecvEvent::Settings);
        Ok(())
    }

    fn on_ping(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if frame.stream_id != 0 {
            return Err(CodecError::Protocol("PING on a stream"));
        }
        if frame.payload.len() != 8 {
            return Err(CodecError::FrameSize(frame.payload.len()));
        }
        if !frame.flags.is_ack() {
            let mut data = [0u8; 8];
            data.copy_from_slice(&frame.payload);
            self.outq.push_back((frames::encode_ping_ack(data), Vec::new()));
        }
        events.push(RecvEvent::Ping);
        Ok(())
    }

    fn on_headers(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(CodecError::Protocol("HEADERS on stream 0"));
        }
        let fragment = frames::headers_fragment(frame.payload, frame.flags)?;
        let end_stream = frame.flags.is_end_stream();

        let kind = if self.streams.contains_key(&frame.stream_id) {
            AccumKind::Trailers
        } else if frame.stream_id % 2 == 0 || frame.stream_id <= self.last_client_stream {
            // Closed or bogus stream; decode to keep HPACK state in sync.
            AccumKind::Discard
        } else {
            AccumKind::Request
        };

        let accum = HeaderAccum {
            stream_id: frame.stream_id,
            end_stream,
            fragment: BytesMut::from(&fragment[..]),
            kind,
        };
        if frame.flags.is_end_headers() {
            self.finish_header_block(accum, events)
        } else {
            self.accum = Some(accum);
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        let Some(mut accum) = self.accum.take() else {
            return Err(CodecError::Protocol("CONTINUATION without HEADERS"));
        };
        accum.fragment.extend_from_slice(&frame.payload);
        if frame.flags.is_end_headers() {
            self.finish_header_block(accum, events)
        } else {
            self.accum = Some(accum);
            Ok(())
        }
    }

    fn finish_header_block(
        &mut self,
        accum: HeaderAccum,
        events: &mut Vec<RecvEvent>,
    ) -> Result<()> {
        let decoded = self
            .hpack_dec
            .decode(&accum.fragment)
            .map_err(|_| CodecError::Compression)?;
        let headers: Vec<Header> = decoded
            .into_iter()
            .map(|(n, v)| {
                (
                    String::from_utf8_lossy(&n).into_owned(),
                    String::from_utf8_lossy(&v).into_owned(),
                )
            })
            .collect();

        let stream_id = accum.stream_id;
        match accum.kind {
            AccumKind::Discard => Ok(()),
            AccumKind::Trailers => {
                if accum.end_stream {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.remote_closed = true;
                    }
                }
                events.push(RecvEvent::Trailers {
                    stream_id,
                    end_stream: accum.end_stream,
                });
                self.maybe_close(stream_id, events);
                Ok(())
            }
            AccumKind::Request => {
                self.last_client_stream = stream_id;
                if self.sent_goaway {
                    return Ok(());
                }
                if let Some(max) = self.local_settings.max_concurrent_streams {
                    let open = self.streams.keys().filter(|id| *id % 2 == 1).count();
                    if open as u32 >= max {
                        self.outq.push_back((
                            frames::encode_rst_stream(stream_id, ErrorCode::RefusedStream),
                            Vec::new(),
                        ));
                        return Ok(());
                    }
                }
                let mut entry = StreamEntry::new(
                    self.remote_settings.initial_window_size,
                    self.local_settings.initial_window_size,
                );
                entry.remote_closed = accum.end_stream;
                self.streams.insert(stream_id, entry);
                events.push(RecvEvent::Request {
                    stream_id,
                    headers,
                    end_stream: accum.end_stream,
                });
                Ok(())
            }
        }
    }

    fn on_data(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(CodecError::Protocol("DATA on stream 0"));
        }
        let consumed = frame.payload.len();
        if self.conn_recv_window.available() < consumed as i64 {
            return Err(CodecError::FlowControl);
        }
        self.conn_recv_window.consume(consumed);

        let end_stream = frame.flags.is_end_stream();
        let data = frames::strip_padding(frame.payload, frame.flags)?;

        // Request bodies are acknowledged and discarded; replenish the
        // windows immediately so uploads never stall.
        if consumed > 0 {
            self.outq
                .push_back((frames::encode_window_update(0, consumed as u32), Vec::new()));
            self.conn_recv_window.increase(consumed as u32)?;
        }

        let Some(stream) = self.streams.get_mut(&frame.stream_id) else {
            return Ok(());
        };
        stream.recv_window.consume(consumed);
        if consumed > 0 && !end_stream {
            stream.recv_window.increase(consumed as u32)?;
            self.outq.push_back((
                frames::encode_window_update(frame.stream_id, consumed as u32),
                Vec::new(),
            ));
        }
        if end_stream {
            stream.remote_closed = true;
        }
        events.push(RecvEvent::Data {
            stream_id: frame.stream_id,
            len: data.len(),
            end_stream,
        });
        self.maybe_close(frame.stream_id, events);
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RawFrame, events: &mut Vec<RecvEvent>) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(CodecError::Protocol("RST_STREAM on stream 0"));
        }
        if frame.payload.len() != 4 {
            return Err(CodecError::FrameSize(frame.payload.len()));
        }
        let error_code = frames::parse_error_code(&frame.payload);
        if self.streams.remove(&frame.stream_id).is_some() {
            events.push(RecvEvent::Rst {
                stream_id: frame.stream_id,
                error_code,
            });
            events.push(RecvEvent::StreamClosed {
                stream_id: frame.stream_id,
            });
        }
        Ok(())
    }

    fn on_window_update(&mut self, frame: RawFrame) -> Result<()> {
        let increment = frames::parse_window_update(&frame.payload)?;
        if increment == 0 {
            return Err(CodecError::Protocol("zero window increment"));
        }
        if frame.stream_id == 0 {
            self.conn_send_window.increase(increment)?;
        } else if let Some(stream) = self.streams.get_mut(&frame.stream_id) {
            stream.send_window.increase(increment)?;
        }
        self.requeue_sendable();
        Ok(())
    }

    /// Re-queue parked body streams whose windows opened up again.
    fn requeue_sendable(&mut self) {
        if self.conn_send_window.available() <= 0 {
            return;
        }
        for (id, stream) in self.streams.iter_mut() {
            if stream.has_body && !stream.queued && stream.send_window.available() > 0 {
                stream.queued = true;
                self.data_queue.push_back(*id);
            }
        }
    }

    fn maybe_close(&mut self, stream_id: u32, events: &mut Vec<RecvEvent>) {
        let done = self
            .streams
            .get(&stream_id)
            .map(|s| s.local_closed && s.remote_closed)
            .unwrap_or(false);
        if done {
            self.streams.remove(&stream_id);
            events.push(RecvEvent::StreamClosed { stream_id });
        }
    }

    /// Produce the next serialised frame (at most one per call) together
    /// with the events it carries. An empty chunk means the codec has
    /// nothing further to write right now.
    pub fn send(&mut self, bodies: &mut dyn BodySource) -> Result<SendChunk> {
        if let Some((data, events)) = self.outq.pop_front() {
            return Ok(SendChunk { data, events });
        }

        while let Some(stream_id) = self.data_queue.pop_front() {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            stream.queued = false;
            if !stream.has_body {
                continue;
            }

            let allowed = stream
                .send_window
                .available()
                .min(self.conn_send_window.available())
                .min(self.remote_settings.max_frame_size as i64);
            if allowed <= 0 {
                // Flow-control blocked; parked until a window update.
                continue;
            }

            let mut pad = self.padding.min(255) as u8;
            let mut overhead = if pad > 0 { 1 + pad as usize } else { 0 };
            if allowed as usize <= overhead {
                pad = 0;
                overhead = 0;
            }
            let mut buf = vec![0u8; allowed as usize - overhead];
            match bodies.pull(stream_id, &mut buf) {
                BodyRead::Error => {
                    self.submit_rst_stream(stream_id, ErrorCode::InternalError);
                    return Ok(self
                        .outq
                        .pop_front()
                        .map(|(data, events)| SendChunk { data, events })
                        .unwrap_or_default());
                }
                BodyRead::Data { n, eof } => {
                    let stream = self.streams.get_mut(&stream_id).expect("stream exists");
                    stream.send_window.consume(n + overhead);
                    self.conn_send_window.consume(n + overhead);

                    let trailers = if eof { stream.trailers.take() } else { None };
                    let end_stream = eof && trailers.is_none();
                    let wire = frames::encode_data(stream_id, &buf[..n], end_stream, pad);
                    let mut events = vec![SendEvent::FrameSent {
                        stream_id,
                        kind: SentFrame::Data,
                        end_stream,
                    }];

                    if eof {
                        stream.has_body = false;
                        stream.local_closed = true;
                        let remote_closed = stream.remote_closed;
                        if let Some(trailers) = trailers {
                            self.queue_trailers(stream_id, &trailers);
                        }
                        if !remote_closed {
                            // Force teardown symmetry for half-open peers.
                            self.submit_rst_stream(stream_id, ErrorCode::NoError);
                        } else if self.streams.remove(&stream_id).is_some() {
                            // Close rides on the last queued frame, or on
                            // this one when nothing else is pending.
                            match self.outq.back_mut() {
                                Some((_, tail)) => {
                                    tail.push(SendEvent::StreamClosed { stream_id })
                                }
                                None => events.push(SendEvent::StreamClosed { stream_id }),
                            }
                        }
                    } else {
                        stream.queued = true;
                        self.data_queue.push_back(stream_id);
                    }
                    return Ok(SendChunk { data: wire, events });
                }
            }
        }

        Ok(SendChunk::default())
    }

    fn queue_trailers(&mut self, stream_id: u32, trailers: &[Header]) {
        let block = self.encode_block(trailers);
        let pad = self.frame_padding();
        let max_frame = self.remote_settings.max_frame_size as usize;
        let wire = frames::encode_headers(stream_id, &block, true, pad, max_frame);
        self.outq.push_back((
            wire,
            vec![SendEvent::FrameSent {
                stream_id,
                kind: SentFrame::Headers,
                end_stream: true,
            }],
        ));
    }

    /// Settings entries for the standard server greeting.
    pub fn initial_settings(header_table_size: Option<u32>) -> Vec<(u16, u32)> {
        let mut entries = vec![(SETTINGS_MAX_CONCURRENT_STREAMS, 100)];
        if let Some(size) = header_table_size {
            entries.push((SETTINGS_HEADER_TABLE_SIZE, size));
        }
        entries
    }
}
