//! Outbound write buffer.

/// Buffer capacity. Large enough for several maximum-size HTTP/2 frames
/// plus framing.
pub const WRITE_BUFFER_SIZE: usize = 65536;

/// Fixed-capacity linear byte buffer between the codec and the socket.
/// `pos` tracks the read cursor, `last` the write cursor.
pub struct WriteBuffer {
    buf: Box<[u8; WRITE_BUFFER_SIZE]>,
    pos: usize,
    last: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        WriteBuffer {
            buf: Box::new([0u8; WRITE_BUFFER_SIZE]),
            pos: 0,
            last: 0,
        }
    }

    /// Bytes that can still be written.
    pub fn wleft(&self) -> usize {
        WRITE_BUFFER_SIZE - self.last
    }

    /// Bytes available for reading.
    pub fn rleft(&self) -> usize {
        self.last - self.pos
    }

    /// Copy in up to `wleft()` bytes from `src`; returns the copied count.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.wleft());
        self.buf[self.last..self.last + n].copy_from_slice(&src[..n]);
        self.last += n;
        n
    }

    /// Advance the read cursor after a successful socket write.
    pub fn drain(&mut self, n: usize) {
        self.pos += n.min(self.rleft());
    }

    /// The readable region.
    pub fn chunk(&self) -> &[u8] {
        &self.buf[self.pos..self.last]
    }

    /// Rewind both cursors; only meaningful once fully drained.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.last = 0;
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
