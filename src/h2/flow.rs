//! Flow-control windows (RFC 7540 Section 5.2).

use super::error::{CodecError, Result};
use super::MAX_WINDOW_SIZE;

/// One direction's flow-control window. Window sizes can go negative
/// after a SETTINGS_INITIAL_WINDOW_SIZE reduction, hence the i64.
#[derive(Debug, Clone, Copy)]
pub struct Window(i64);

impl Window {
    pub fn new(initial: u32) -> Self {
        Window(initial as i64)
    }

    pub fn available(&self) -> i64 {
        self.0
    }

    /// Consume capacity after sending or receiving data.
    pub fn consume(&mut self, amount: usize) {
        self.0 -= amount as i64;
    }

    /// Widen the window from a WINDOW_UPDATE.
    pub fn increase(&mut self, increment: u32) -> Result<()> {
        let updated = self.0 + increment as i64;
        if updated > MAX_WINDOW_SIZE {
            return Err(CodecError::FlowControl);
        }
        self.0 = updated;
        Ok(())
    }

    /// Rebase after the peer changed SETTINGS_INITIAL_WINDOW_SIZE; the
    /// current size shifts by the difference (RFC 7540 Section 6.9.2).
    pub fn rebase(&mut self, old_initial: u32, new_initial: u32) {
        self.0 += new_initial as i64 - old_initial as i64;
    }
}
