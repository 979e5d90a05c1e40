//! `Settings` and the three standard presets (spec.md §3 "Settings").

use crate::error::{Error, Result};
use crate::frame::settings_id;
use crate::limits::UNLIMITED;

/// The six SETTINGS values, addressed by id 1..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

/// RFC-defined defaults, unlimited where the RFC leaves a value
/// unbounded.
pub const STANDARD: Settings = Settings {
    header_table_size: 4096,
    enable_push: true,
    max_concurrent_streams: UNLIMITED,
    initial_window_size: 65535,
    max_frame_size: 16384,
    max_header_list_size: UNLIMITED,
};

/// Assumed for the remote side before its first SETTINGS frame arrives.
pub const CONSERVATIVE: Settings = Settings { max_concurrent_streams: 100, ..STANDARD };

/// What we advertise in our own first SETTINGS frame.
pub const INITIAL: Settings = Settings { max_concurrent_streams: 1024, ..STANDARD };

impl Default for Settings {
    fn default() -> Self {
        CONSERVATIVE
    }
}

impl Settings {
    pub fn get(&self, id: u16) -> Option<u32> {
        match id {
            settings_id::HEADER_TABLE_SIZE => Some(self.header_table_size),
            settings_id::ENABLE_PUSH => Some(self.enable_push as u32),
            settings_id::MAX_CONCURRENT_STREAMS => Some(self.max_concurrent_streams),
            settings_id::INITIAL_WINDOW_SIZE => Some(self.initial_window_size),
            settings_id::MAX_FRAME_SIZE => Some(self.max_frame_size),
            settings_id::MAX_HEADER_LIST_SIZE => Some(self.max_header_list_size),
            _ => None,
        }
    }

    /// Apply one (id, value) SETTINGS entry, validating per spec.md
    /// §4.2. Unknown ids are ignored (RFC 7540 §6.5.2).
    pub fn apply(&mut self, id: u16, value: u32) -> Result<()> {
        match id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = value,
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(Error::protocol_error("ENABLE_PUSH must be 0 or 1"));
                }
                self.enable_push = value == 1;
            }
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = value,
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > 0x7FFF_FFFF {
                    return Err(Error::flow_control_error("INITIAL_WINDOW_SIZE exceeds 2^31-1"));
                }
                self.initial_window_size = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(16384..=16_777_215).contains(&value) {
                    return Err(Error::protocol_error("MAX_FRAME_SIZE out of [2^14, 2^24-1]"));
                }
                self.max_frame_size = value;
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = value,
            _ => {}
        }
        Ok(())
    }

    /// Parse a SETTINGS frame payload into `(id, value)` pairs. The
    /// payload length must be a multiple of 6.
    pub fn parse_payload(payload: &[u8]) -> Result<Vec<(u16, u32)>> {
        if payload.len() % 6 != 0 {
            return Err(Error::frame_size_error("SETTINGS payload not a multiple of 6"));
        }
        Ok(payload
            .chunks_exact(6)
            .map(|chunk| {
                let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                (id, value)
            })
            .collect())
    }

    /// Encode the settings that differ from `STANDARD` — the "initial
    /// SETTINGS diff" spec.md §4.1 describes sending on connection
    /// start.
    pub fn encode_diff_from_standard(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut push = |id: u16, value: u32| {
            out.extend_from_slice(&id.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        };
        if self.header_table_size != STANDARD.header_table_size {
            push(settings_id::HEADER_TABLE_SIZE, self.header_table_size);
        }
        if self.enable_push != STANDARD.enable_push {
            push(settings_id::ENABLE_PUSH, self.enable_push as u32);
        }
        if self.max_concurrent_streams != STANDARD.max_concurrent_streams {
            push(settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams);
        }
        if self.initial_window_size != STANDARD.initial_window_size {
            push(settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size);
        }
        if self.max_frame_size != STANDARD.max_frame_size {
            push(settings_id::MAX_FRAME_SIZE, self.max_frame_size);
        }
        if self.max_header_list_size != STANDARD.max_header_list_size {
            push(settings_id::MAX_HEADER_LIST_SIZE, self.max_header_list_size);
        }
        out
    }
}
