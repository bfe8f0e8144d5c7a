//! SETTINGS frame parameters (RFC 7540 SS6.5, SPEC_FULL.md SS4.5).

use crate::h2::frame::DEFAULT_MAX_FRAME_SIZE;

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// A negotiated SETTINGS set, as tracked per direction (ours and the
/// peer's, each starting from the RFC defaults).
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
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Our outgoing preferences, sent in the client's first SETTINGS frame.
    pub fn client_defaults() -> Settings {
        Settings {
            header_table_size: 4096,
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: 1 << 20,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }

    pub fn as_params(&self) -> Vec<(u16, u32)> {
        let mut params = vec![
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_ENABLE_PUSH, self.enable_push as u32),
            (SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size),
            (SETTINGS_MAX_FRAME_SIZE, self.max_frame_size),
        ];
        if let Some(max) = self.max_concurrent_streams {
            params.push((SETTINGS_MAX_CONCURRENT_STREAMS, max));
        }
        if let Some(max) = self.max_header_list_size {
            params.push((SETTINGS_MAX_HEADER_LIST_SIZE, max));
        }
        params
    }

    /// Apply a peer-sent SETTINGS param list, returning the delta to the
    /// initial window size (used to adjust already-open streams' windows).
    pub fn apply(&mut self, params: &[(u16, u32)]) -> i64 {
        let previous_initial_window = self.initial_window_size;
        for &(id, value) in params {
            match id {
                SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
                SETTINGS_ENABLE_PUSH => self.enable_push = value != 0,
                SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
                SETTINGS_INITIAL_WINDOW_SIZE => self.initial_window_size = value,
                SETTINGS_MAX_FRAME_SIZE => self.max_frame_size = value,
                SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
                _ => {}
            }
        }
        self.initial_window_size as i64 - previous_initial_window as i64
    }
}
