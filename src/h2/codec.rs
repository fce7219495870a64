//! Incremental frame decoding.
//!
//! The transport feeds whatever bytes arrived; [`FrameDecoder`] buffers
//! partial frames and yields complete ones.

use super::error::{CodecError, Result};
use super::frames::{decode_header, FrameType, RawFrame, FRAME_HEADER_SIZE};
use bytes::{Buf, BytesMut};

/// Accumulates transport bytes and produces whole frames.
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: u32,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        FrameDecoder {
            buf: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Append freshly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let header: [u8; FRAME_HEADER_SIZE] =
            self.buf[..FRAME_HEADER_SIZE].try_into().expect("header size");
        let (raw_kind, flags, stream_id, length) = decode_header(&header);
        if length > self.max_frame_size as usize {
            return Err(CodecError::FrameSize(length));
        }
        if self.buf.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_SIZE);
        let payload = self.buf.split_to(length).freeze();
        Ok(Some(RawFrame {
            kind: FrameType::from_u8(raw_kind),
            flags,
            stream_id,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::frames::{encode_ping_ack, encode_settings};

    #[test]
    fn test_whole_frame() {
        let mut decoder = FrameDecoder::new(16384);
        decoder.feed(&encode_settings(&[(0x3, 100)]));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind, Some(FrameType::Settings));
        assert_eq!(frame.stream_id, 0);
        assert_eq!(frame.payload.len(), 6);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_split_delivery() {
        let wire = encode_ping_ack([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut decoder = FrameDecoder::new(16384);
        decoder.feed(&wire[..5]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&wire[5..12]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&wire[12..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind, Some(FrameType::Ping));
        assert_eq!(&frame.payload[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = encode_settings(&[]).to_vec();
        wire.extend_from_slice(&encode_ping_ack([0; 8]));
        let mut decoder = FrameDecoder::new(16384);
        decoder.feed(&wire);
        assert_eq!(
            decoder.next_frame().unwrap().unwrap().kind,
            Some(FrameType::Settings)
        );
        assert_eq!(
            decoder.next_frame().unwrap().unwrap().kind,
            Some(FrameType::Ping)
        );
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_unknown_frame_type() {
        let wire = vec![0, 0, 1, 0x77, 0, 0, 0, 0, 1, 0xff];
        let mut decoder = FrameDecoder::new(16384);
        decoder.feed(&wire);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind, None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        // Claims a 1 MiB payload.
        let wire = [0x10, 0x00, 0x00, 0x0, 0, 0, 0, 0, 1];
        let mut decoder = FrameDecoder::new(16384);
        decoder.feed(&wire);
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::FrameSize(_))
        ));
    }
}
