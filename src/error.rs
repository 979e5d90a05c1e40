//! Error kinds surfaced to the embedder (spec.md §6/§7).
//!
//! The three handling tiers described in the module-level docs map onto
//! this enum as follows: tier 1 (recoverable per-stream) is handled
//! internally and never reaches the embedder as an `Err`; tiers 2 and 3
//! (connection-fatal) are returned from [`crate::Connection`] entry points.

use std::borrow::Cow;

use crate::frame::error_code;

/// Errors an embedder can observe from a [`crate::Connection`] entry point.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer violated the protocol. The connection already sent (or is
    /// about to send) GOAWAY with `code`; the embedder must call
    /// `connection_lost` to reclaim state.
    #[error("transport error ({code}): {reason}")]
    Transport { code: u32, reason: Cow<'static, str> },

    /// A frame referenced a stream id that is neither known nor explained
    /// by the recently-reset history.
    #[error("invalid stream: {reason}")]
    InvalidStream { reason: Cow<'static, str> },

    /// This side has reached its own concurrency limit; retry after
    /// `on_stream_end` fires for some other stream.
    #[error("would block: {reason}")]
    WouldBlock { reason: Cow<'static, str> },

    /// Allocation failed (streams, HPACK entries and the inbound buffer
    /// are heap-allocated).
    #[error("no memory: {reason}")]
    NoMemory { reason: Cow<'static, str> },

    /// HPACK state has desynchronized between peers. Unrecoverable by
    /// definition — both sides' dynamic tables are now unreliable.
    #[error("compression error: {reason}")]
    Compression { reason: Cow<'static, str> },

    /// Clean shutdown: our side closed, or the peer sent GOAWAY with
    /// `NO_ERROR`.
    #[error("disconnected")]
    Disconnect,

    /// The embedder called an API in a disallowed state (e.g.
    /// `write_message` on a non-writable stream). Never signaled to the
    /// peer.
    #[error("assertion failed: {reason}")]
    Assertion { reason: Cow<'static, str> },
}

impl Error {
    pub(crate) fn transport(code: u32, reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Transport { code, reason: reason.into() }
    }

    pub(crate) fn protocol_error(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Transport { code: error_code::PROTOCOL_ERROR, reason: reason.into() }
    }

    pub(crate) fn frame_size_error(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Transport { code: error_code::FRAME_SIZE_ERROR, reason: reason.into() }
    }

    pub(crate) fn flow_control_error(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Transport { code: error_code::FLOW_CONTROL_ERROR, reason: reason.into() }
    }

    pub(crate) fn compression(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Compression { reason: reason.into() }
    }

    pub(crate) fn invalid_stream(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidStream { reason: reason.into() }
    }

    pub(crate) fn would_block(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::WouldBlock { reason: reason.into() }
    }

    pub(crate) fn assertion(reason: impl Into<Cow<'static, str>>) -> Self {
        Error::Assertion { reason: reason.into() }
    }

    /// The GOAWAY/RST_STREAM error code this error should be reported to
    /// the peer with, if any (connection-fatal transport errors only).
    pub fn wire_code(&self) -> Option<u32> {
        match self {
            Error::Transport { code, .. } => Some(*code),
            Error::Compression { .. } => Some(error_code::COMPRESSION_ERROR),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
