//! Tunable constants (spec.md §6 "Tunable constants") and the three
//! standard `Settings` presets (spec.md §3).
//!
//! Generalizes the teacher's single `pub const MAX_HEADER_BLOCK_SIZE` into
//! the full set of bounds the connection state machine enforces.

/// Minimum growth step for the inbound byte buffer.
pub const BUFFER_ALLOC_MIN: usize = 256;

/// Growth factor applied to the buffer's capacity when `BUFFER_ALLOC_MIN`
/// is not enough to satisfy a single append.
pub const BUFFER_ALLOC_MIN_EXP: f64 = 1.5;

/// Fixed stack buffer size for a single HTTP/1 header line (name + value).
pub const MAX_HTTP1_HEADER_SIZE: usize = 2048;

/// Maximum number of headers `httparse` will parse out of one HTTP/1
/// message.
pub const MAX_HEADERS: usize = 64;

/// Maximum number of CONTINUATION frames accepted after a single HEADERS
/// or PUSH_PROMISE before the accumulated header block is rejected with
/// `ENHANCE_YOUR_CALM`. The watermark this bounds the buffer to is
/// `(MAX_CONTINUATIONS + 1) * max_frame_size`.
pub const MAX_CONTINUATIONS: usize = 3;

/// Bucket count for the stream table's hash map, kept prime as in the
/// teacher's C ancestor even though `std::collections::HashMap` does not
/// need it — documented for fidelity to spec.md §2, not load-bearing.
pub const STREAM_BUCKETS: usize = 61;

/// Capacity of the "recently reset" ring (spec.md §4.2 invalid-stream
/// rule).
pub const STREAM_RESET_HISTORY: usize = 7;

/// A sentinel meaning "no limit" for settings fields that are
/// conceptually unbounded (`MAX_CONCURRENT_STREAMS`, `MAX_HEADER_LIST_SIZE`).
pub const UNLIMITED: u32 = u32::MAX;
