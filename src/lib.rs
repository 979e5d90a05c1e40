//! h2-sans-io: a sans-I/O HTTP/2 protocol engine
//!
//! This crate drives the HTTP/2 (RFC 7540) connection state machine —
//! frame demultiplexing, HPACK header compression, stream lifecycle and
//! flow control — plus transparent HTTP/1.1 compatibility and the h2c
//! cleartext upgrade, without owning any I/O itself. It consumes opaque
//! bytes from a transport and emits opaque bytes plus structured events
//! through an [`EventSink`](connection::EventSink); callers own the
//! socket, the TLS layer, and the event loop.
//!
//! # Quick Start
//!
//! ```rust
//! use h2_sans_io::connection::{Connection, EventSink, Role};
//!
//! #[derive(Default)]
//! struct Sink { out: Vec<u8> }
//! impl EventSink for Sink {
//!     fn on_write(&mut self, bytes: &[u8]) { self.out.extend_from_slice(bytes); }
//! }
//!
//! let mut client = Connection::init(Role::Client);
//! let mut sink = Sink::default();
//! client.on_connect(true, &mut sink).unwrap();
//! assert!(!sink.out.is_empty()); // preface + initial SETTINGS
//! ```
//!
//! # Architecture
//!
//! - [`connection`]: the per-connection state machine (the core driver).
//! - [`frame`]: HTTP/2 frame header parsing/emission and wire constants.
//! - [`hpack`]: RFC 7541 header compression (dynamic table, Huffman,
//!   integer codec).
//! - [`http1`]: the HTTP/1.x compatibility and h2c-upgrade parsing layer.
//! - [`settings`]: the SETTINGS value set and its standard presets.
//! - [`stream`]: per-stream state and the connection's stream table.
//! - [`buffer`]: the inbound byte queue.
//! - [`error`]: the error kinds surfaced to the embedder.
//! - [`limits`]: tunable bounds (buffer growth, header/continuation caps).
//!
//! It does NOT provide: TCP/UDP transport, TLS/ALPN negotiation, request
//! routing, or connection pooling — those stay with the embedder.

pub mod buffer;
pub mod connection;
pub mod error;
pub mod frame;
pub mod hpack;
pub mod http1;
pub mod limits;
pub mod settings;
pub mod stream;

pub use connection::{Connection, EventSink, Message, Progress, Role, State};
pub use error::{Error, Result};
pub use hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder, Header};
pub use settings::Settings;
