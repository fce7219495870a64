//! SETTINGS parameters (RFC 7540 Section 6.5).

use super::error::{CodecError, Result};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_WINDOW_SIZE};

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// One endpoint's settings, starting from the RFC defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Apply one received (identifier, value) entry, validating per
    /// RFC 7540 Section 6.5.2. Unknown identifiers are ignored.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<()> {
        match id {
            SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
            SETTINGS_ENABLE_PUSH => match value {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(CodecError::Protocol("ENABLE_PUSH must be 0 or 1")),
            },
            SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            SETTINGS_INITIAL_WINDOW_SIZE => {
                if value as i64 > MAX_WINDOW_SIZE {
                    return Err(CodecError::FlowControl);
                }
                self.initial_window_size = value;
            }
            SETTINGS_MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=0x00ff_ffff).contains(&value) {
                    return Err(CodecError::Protocol("MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = value;
            }
            SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.header_table_size, 4096);
        assert!(settings.enable_push);
        assert_eq!(settings.max_concurrent_streams, None);
        assert_eq!(settings.initial_window_size, 65535);
        assert_eq!(settings.max_frame_size, 16384);
    }

    #[test]
    fn test_apply() {
        let mut settings = Settings::default();
        settings.apply(SETTINGS_MAX_CONCURRENT_STREAMS, 100).unwrap();
        settings.apply(SETTINGS_INITIAL_WINDOW_SIZE, 1 << 20).unwrap();
        settings.apply(SETTINGS_ENABLE_PUSH, 0).unwrap();
        assert_eq!(settings.max_concurrent_streams, Some(100));
        assert_eq!(settings.initial_window_size, 1 << 20);
        assert!(!settings.enable_push);
    }

    #[test]
    fn test_apply_rejects_invalid() {
        let mut settings = Settings::default();
        assert!(settings.apply(SETTINGS_ENABLE_PUSH, 2).is_err());
        assert!(settings.apply(SETTINGS_INITIAL_WINDOW_SIZE, 0x8000_0000).is_err());
        assert!(settings.apply(SETTINGS_MAX_FRAME_SIZE, 100).is_err());
        assert!(settings.apply(SETTINGS_MAX_FRAME_SIZE, 0x0100_0000).is_err());
    }

    #[test]
    fn test_apply_ignores_unknown() {
        let mut settings = Settings::default();
        settings.apply(0x42, 7).unwrap();
    }
}
