//! HTTP/2 frame types and wire encoding (RFC 7540 Section 4 and 6).
//!
//! Encoders cover the frames a server emits; decoding works on raw frames
//! produced by [`crate::h2::codec::FrameDecoder`] with the payload
//! strippers below.

use super::error::{CodecError, ErrorCode, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Frame header size on the wire (9 bytes).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Frame types of RFC 7540 Section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Frame flag byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;

    pub fn empty() -> Self {
        FrameFlags(0)
    }

    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// A frame as it came off the wire, payload untouched.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// `None` for frame types this implementation does not know; RFC 7540
    /// Section 4.1 requires those to be ignored.
    pub kind: Option<FrameType>,
    pub flags: FrameFlags,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Encode the 9-byte frame header.
pub fn encode_header(
    kind: FrameType,
    flags: FrameFlags,
    stream_id: u32,
    length: usize,
) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header[0] = ((length >> 16) & 0xff) as u8;
    header[1] = ((length >> 8) & 0xff) as u8;
    header[2] = (length & 0xff) as u8;
    header[3] = kind.as_u8();
    header[4] = flags.as_u8();
    let stream_id = stream_id & 0x7fff_ffff;
    header[5..9].copy_from_slice(&stream_id.to_be_bytes());
    header
}

/// Decode the 9-byte frame header; the type byte is returned raw so
/// unknown frames can be skipped.
pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
    let length =
        ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
    let flags = FrameFlags::from_u8(bytes[4]);
    let stream_id = u32::from_be_bytes([bytes[5] & 0x7f, bytes[6], bytes[7], bytes[8]]);
    (bytes[3], flags, stream_id, length)
}

/// Encode a DATA frame, optionally padded.
pub fn encode_data(stream_id: u32, data: &[u8], end_stream: bool, padding: u8) -> Bytes {
    let mut flags = FrameFlags::empty();
    if end_stream {
        flags.set(FrameFlags::END_STREAM);
    }
    let mut payload_len = data.len();
    if padding > 0 {
        flags.set(FrameFlags::PADDED);
        payload_len += 1 + padding as usize;
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
    buf.put_slice(&encode_header(FrameType::Data, flags, stream_id, payload_len));
    if padding > 0 {
        buf.put_u8(padding);
    }
    buf.put_slice(data);
    if padding > 0 {
        buf.put_bytes(0, padding as usize);
    }
    buf.freeze()
}

/// Encode a header block as a HEADERS frame followed by CONTINUATION
/// frames when the block exceeds the peer's maximum frame size. Padding
/// applies to the HEADERS frame only.
pub fn encode_headers(
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    padding: u8,
    max_frame_size: usize,
) -> Bytes {
    let mut flags = FrameFlags::empty();
    if end_stream {
        flags.set(FrameFlags::END_STREAM);
    }

    let pad_overhead = if padding > 0 { 1 + padding as usize } else { 0 };
    let first_len = block.len().min(max_frame_size.saturating_sub(pad_overhead));
    let mut rest = &block[first_len..];
    if rest.is_empty() {
        flags.set(FrameFlags::END_HEADERS);
    }
    if padding > 0 {
        flags.set(FrameFlags::PADDED);
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + first_len + pad_overhead);
    buf.put_slice(&encode_header(
        FrameType::Headers,
        flags,
        stream_id,
        first_len + pad_overhead,
    ));
    if padding > 0 {
        buf.put_u8(padding);
    }
    buf.put_slice(&block[..first_len]);
    if padding > 0 {
        buf.put_bytes(0, padding as usize);
    }

    while !rest.is_empty() {
        let n = rest.len().min(max_frame_size);
        let mut cflags = FrameFlags::empty();
        if n == rest.len() {
            cflags.set(FrameFlags::END_HEADERS);
        }
        buf.put_slice(&encode_header(FrameType::Continuation, cflags, stream_id, n));
        buf.put_slice(&rest[..n]);
        rest = &rest[n..];
    }

    buf.freeze()
}

/// Encode a PUSH_PROMISE frame carrying the promised request's header
/// block. The block is assumed to fit a single frame.
pub fn encode_push_promise(stream_id: u32, promised_stream_id: u32, block: &[u8]) -> Bytes {
    let mut flags = FrameFlags::empty();
    flags.set(FrameFlags::END_HEADERS);
    let payload_len = 4 + block.len();
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
    buf.put_slice(&encode_header(
        FrameType::PushPromise,
        flags,
        stream_id,
        payload_len,
    ));
    buf.put_u32(promised_stream_id & 0x7fff_ffff);
    buf.put_slice(block);
    buf.freeze()
}

/// Encode a SETTINGS frame from (identifier, value) entries.
pub fn encode_settings(entries: &[(u16, u32)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + entries.len() * 6);
    buf.put_slice(&encode_header(
        FrameType::Settings,
        FrameFlags::empty(),
        0,
        entries.len() * 6,
    ));
    for &(id, value) in entries {
        buf.put_u16(id);
        buf.put_u32(value);
    }
    buf.freeze()
}

/// Encode a SETTINGS acknowledgement.
pub fn encode_settings_ack() -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
    buf.put_slice(&encode_header(
        FrameType::Settings,
        FrameFlags::from_u8(FrameFlags::ACK),
        0,
        0,
    ));
    buf.freeze()
}

/// Encode a PING acknowledgement echoing the peer's opaque data.
pub fn encode_ping_ack(data: [u8; 8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
    buf.put_slice(&encode_header(
        FrameType::Ping,
        FrameFlags::from_u8(FrameFlags::ACK),
        0,
        8,
    ));
    buf.put_slice(&data);
    buf.freeze()
}

/// Encode a GOAWAY frame.
pub fn encode_goaway(last_stream_id: u32, error_code: ErrorCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
    buf.put_slice(&encode_header(FrameType::Goaway, FrameFlags::empty(), 0, 8));
    buf.put_u32(last_stream_id & 0x7fff_ffff);
    buf.put_u32(error_code.as_u32());
    buf.freeze()
}

/// Encode a WINDOW_UPDATE frame.
pub fn encode_window_update(stream_id: u32, increment: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
    buf.put_slice(&encode_header(
        FrameType::WindowUpdate,
        FrameFlags::empty(),
        stream_id,
        4,
    ));
    buf.put_u32(increment & 0x7fff_ffff);
    buf.freeze()
}

/// Encode an RST_STREAM frame.
pub fn encode_rst_stream(stream_id: u32, error_code: ErrorCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
    buf.put_slice(&encode_header(
        FrameType::RstStream,
        FrameFlags::empty(),
        stream_id,
        4,
    ));
    buf.put_u32(error_code.as_u32());
    buf.freeze()
}

/// Strip the padding envelope from a DATA payload. Returns the data
/// portion; the caller accounts the full payload against flow control.
pub fn strip_padding(payload: Bytes, flags: FrameFlags) -> Result<Bytes> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(CodecError::Protocol("padded frame without pad length"));
    }
    let pad = payload[0] as usize;
    if pad + 1 > payload.len() {
        return Err(CodecError::Protocol("padding exceeds payload"));
    }
    Ok(payload.slice(1..payload.len() - pad))
}

/// Extract the header block fragment from a HEADERS payload, stripping
/// padding and the optional priority section.
pub fn headers_fragment(payload: Bytes, flags: FrameFlags) -> Result<Bytes> {
    let mut fragment = strip_padding(payload, flags)?;
    if flags.is_priority() {
        if fragment.len() < 5 {
            return Err(CodecError::Protocol("truncated priority section"));
        }
        fragment = fragment.slice(5..);
    }
    Ok(fragment)
}

/// Parse a SETTINGS payload into (identifier, value) entries.
pub fn parse_settings(payload: &[u8]) -> Result<Vec<(u16, u32)>> {
    if payload.len() % 6 != 0 {
        return Err(CodecError::FrameSize(payload.len()));
    }
    Ok(payload
        .chunks_exact(6)
        .map(|entry| {
            (
                u16::from_be_bytes([entry[0], entry[1]]),
                u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]),
            )
        })
        .collect())
}

/// Parse a WINDOW_UPDATE payload into the increment.
pub fn parse_window_update(payload: &[u8]) -> Result<u32> {
    if payload.len() != 4 {
        return Err(CodecError::FrameSize(payload.len()));
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff)
}

/// Parse an RST_STREAM or the error-code half of a GOAWAY payload.
pub fn parse_error_code(payload: &[u8]) -> ErrorCode {
    ErrorCode::from_u32(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
    .unwrap_or(ErrorCode::InternalError)
}
