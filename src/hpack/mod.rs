//! HPACK: Header Compression for HTTP/2 (RFC 7541), spec.md §4.3.
//!
//! This module owns the dynamic table, the integer and Huffman
//! primitives, and the decoder/encoder built on top of them. Unlike the
//! teacher's thin wrapper around `fluke-hpack`, this is a self-contained
//! implementation — HPACK is one of the three subsystems spec.md calls
//! out as a "hard part" in its own right, so wrapping an external codec
//! would leave the actual work undone.

mod decoder;
mod encoder;
mod header;
mod huffman;
mod primitive;
mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use header::Header;
pub use table::STATIC_SIZE;
