//! The connection state machine (spec.md §4.1 "Connection state machine",
//! §4.2 "Frame handlers", §4.4 "Flow control", §4.5 "Write path").
//!
//! This is the 35%-of-budget top-level driver: it owns the inbound byte
//! buffer, dispatches parsed HTTP/2 frames (or HTTP/1 messages) to the
//! right handler, keeps the stream table and both HPACK directions in
//! sync, and turns everything back into bytes through a single
//! `EventSink::on_write` call per outbound chunk.

use tracing::{debug, trace, warn};

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::frame::{self, error_code, flags, frame_type, settings_id, FrameHeader, CONNECTION_PREFACE};
use crate::hpack::{Decoder, Encoder, Header};
use crate::http1::{self, BodyMode, Upgrade};
use crate::limits::{MAX_CONTINUATIONS, STREAM_RESET_HISTORY};
use crate::settings::{Settings, CONSERVATIVE, INITIAL};
use crate::stream::{Accept, Stream, StreamTable};

/// Client or server role. The state machine is symmetric; this only
/// decides stream-id parity and a handful of HTTP/1 framing choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection lifecycle states (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Undefined,
    Http1Ready,
    Http1Reading,
    Http1ReadingUpgrade,
    UnknownProtocolUpgrade,
    UnknownProtocol,
    Init,
    Preface,
    ReadyNoSettings,
    Ready,
}

/// Outcome of driving the connection forward one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Processed everything currently available; waiting for more bytes.
    Ok,
    /// The connection is finished; no further entry point may be called
    /// except to observe the same result again.
    Disconnect,
}

/// A message's pseudo- and regular headers, used for both inbound
/// delivery (`on_message_start`) and outbound construction
/// (`write_message`).
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub headers: Vec<Header>,
}

/// Callbacks the embedder supplies (spec.md §6). Every method has a
/// no-op default except `on_write`, matching spec.md §9's "pass a
/// trait/interface object" guidance; implementors override only the
/// events they care about.
pub trait EventSink {
    /// Outbound bytes, in the exact order and framing the engine chose.
    /// The only callback without a default — a sink that drops bytes is
    /// never useful.
    fn on_write(&mut self, bytes: &[u8]);

    fn on_stream_start(&mut self, _id: u32) {}
    fn on_stream_end(&mut self, _id: u32) {}
    fn on_message_start(&mut self, _id: u32, _msg: &Message) {}
    fn on_message_data(&mut self, _id: u32, _bytes: &[u8]) {}
    fn on_message_end(&mut self, _id: u32) {}
    fn on_message_trail(&mut self, _id: u32, _msg: &Message) {}
    fn on_message_push(&mut self, _parent_id: u32, _msg: &Message, _child_id: u32) {}
    fn on_settings(&mut self) {}
    fn on_pong(&mut self, _payload: [u8; 8]) {}
    fn on_flow_increase(&mut self, _stream_or_zero: u32) {}
    fn on_upgrade(&mut self) {}
}

/// Continuation-reassembly bookkeeping, logically owned by whichever
/// stream holds `stream_id` (spec.md §9).
#[derive(Debug, Default)]
struct Continued {
    stream_id: u32,
    promise_id: u32,
    end_stream: bool,
    is_trailers: bool,
    /// Stream was locally reset before its initial header block finished
    /// arriving (`Accept::NOP_HEADERS`, spec.md §3): decode to keep HPACK
    /// state in sync, but never deliver the block to the embedder.
    is_nop: bool,
    buf: Vec<u8>,
}

/// HTTP/1 body-remaining accounting: exact count, or the "chunked"
/// sentinel spec.md §3 describes.
#[derive(Debug, Clone, Copy)]
enum BodyRemaining {
    None,
    Exact(u64),
    Chunked,
}

pub struct Connection {
    role: Role,
    state: State,
    inbound: ByteBuffer,

    continued: Option<Continued>,

    local: Settings,
    remote: Settings,

    decoder: Decoder,
    encoder: Encoder,

    conn_send_window: i64,
    conn_recv_window: i64,

    last_stream_local: u32,
    last_stream_remote: u32,
    stream_count_local: u32,
    stream_count_remote: u32,

    streams: StreamTable,

    http1_body_remaining: BodyRemaining,
    http1_current_stream: u32,
    manual_flow_control: bool,
    /// Where to transition once the in-flight HTTP/1 message's body
    /// finishes draining. `None` means the ordinary "back to
    /// HTTP1_READY" case; `Some(State::Preface)` is the h2c-upgrade
    /// case (spec.md §4.1 "HTTP1_READING_UPGRADE").
    post_body_state: Option<State>,
    /// The request's body mode, parked while `UNKNOWN_PROTOCOL_UPGRADE`
    /// awaits the embedder's accept/reject decision (spec.md §4.1).
    pending_upgrade_body_mode: BodyMode,
    /// Whether the embedder wants a say over non-h2c protocol upgrades
    /// (spec.md §4.1 "embedder-registered"). See
    /// [`Self::set_unknown_protocol_upgrades`].
    unknown_protocol_upgrades: bool,
}

impl Connection {
    /// `init(role)` (spec.md §6).
    pub fn init(role: Role) -> Self {
        Self {
            role,
            state: State::Undefined,
            inbound: ByteBuffer::new(),
            continued: None,
            local: INITIAL,
            remote: CONSERVATIVE,
            decoder: Decoder::new(INITIAL.header_table_size),
            encoder: Encoder::new(CONSERVATIVE.header_table_size),
            conn_send_window: 65535,
            conn_recv_window: 65535,
            last_stream_local: 0,
            last_stream_remote: 0,
            stream_count_local: 0,
            stream_count_remote: 0,
            streams: StreamTable::new(),
            http1_body_remaining: BodyRemaining::None,
            http1_current_stream: 0,
            manual_flow_control: false,
            post_body_state: None,
            pending_upgrade_body_mode: BodyMode::None,
            unknown_protocol_upgrades: false,
        }
    }

    /// Override the settings this side advertises, before `on_connect`.
    pub fn set_settings(&mut self, settings: Settings) {
        self.local = settings;
    }

    pub fn set_manual_flow_control(&mut self, manual: bool) {
        self.manual_flow_control = manual;
    }

    /// Register interest in non-h2c protocol upgrades (spec.md §4.1
    /// "other + embedder-registered → UNKNOWN_PROTOCOL_UPGRADE"). With
    /// no registered interest (the default), an `Upgrade:` token other
    /// than h2c is ignored and the request is processed as an ordinary
    /// HTTP/1 message; a registered embedder instead gets the pause-and-
    /// decide flow (see [`Self::accept_unknown_protocol_upgrade`]).
    pub fn set_unknown_protocol_upgrades(&mut self, interested: bool) {
        self.unknown_protocol_upgrades = interested;
    }

    /// `on_connect(version)`. `http2_prior_knowledge` selects whether we
    /// start directly in HTTP/2 (true) or HTTP/1 with h2c/h2-prior-
    /// knowledge upgrade still possible (false).
    pub fn on_connect(&mut self, http2_prior_knowledge: bool, sink: &mut impl EventSink) -> Result<()> {
        if http2_prior_knowledge {
            self.state = State::Init;
            self.enter_http2(sink)
        } else {
            self.state = State::Http1Ready;
            Ok(())
        }
    }

    fn send_preface_and_settings(&mut self, sink: &mut impl EventSink) {
        let mut out = Vec::new();
        if self.role == Role::Client {
            out.extend_from_slice(CONNECTION_PREFACE);
        }
        let diff = self.local.encode_diff_from_standard();
        FrameHeader::write(frame_type::SETTINGS, 0, 0, diff.len(), &mut out);
        out.extend_from_slice(&diff);
        sink.on_write(&out);
    }

    fn enter_http2(&mut self, sink: &mut impl EventSink) -> Result<()> {
        self.send_preface_and_settings(sink);
        self.state = if self.role == Role::Server { State::Preface } else { State::ReadyNoSettings };
        Ok(())
    }

    /// `connection_lost()` (spec.md §5 "Cancellation").
    pub fn connection_lost(&mut self, sink: &mut impl EventSink) {
        if self.state == State::Undefined {
            return;
        }
        for id in self.streams.ids() {
            sink.on_stream_end(id);
        }
        self.streams = StreamTable::new();
        self.state = State::Undefined;
    }

    /// `consume_bytes(buf)`: append to the inbound buffer, then drive
    /// frames/messages out of it until no further progress is possible.
    pub fn consume_bytes(&mut self, buf: &[u8], sink: &mut impl EventSink) -> Result<Progress> {
        if self.state == State::Undefined {
            return Ok(Progress::Disconnect);
        }
        self.inbound.append(buf);
        loop {
            let consumed = match self.state {
                State::Http1Ready => self.drive_http1_ready(sink)?,
                State::Http1Reading | State::Http1ReadingUpgrade => self.drive_http1_body(sink)?,
                State::Preface => self.drive_preface()?,
                State::Init | State::ReadyNoSettings | State::Ready => self.drive_http2(sink)?,
                State::UnknownProtocol => self.drive_tunnel(sink),
                State::UnknownProtocolUpgrade | State::Undefined => 0,
            };
            if consumed == 0 {
                break;
            }
        }
        Ok(if self.state == State::Undefined { Progress::Disconnect } else { Progress::Ok })
    }

    fn drive_tunnel(&mut self, sink: &mut impl EventSink) -> usize {
        if self.inbound.is_empty() {
            return 0;
        }
        let data = self.inbound.shift(self.inbound.len());
        let n = data.len();
        sink.on_message_data(1, &data);
        n
    }

    fn drive_preface(&mut self) -> Result<usize> {
        if self.inbound.len() < CONNECTION_PREFACE.len() {
            return Ok(0);
        }
        if &self.inbound.as_slice()[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE {
            return Err(Error::protocol_error("client preface mismatch"));
        }
        self.inbound.discard(CONNECTION_PREFACE.len());
        self.state = State::ReadyNoSettings;
        Ok(CONNECTION_PREFACE.len())
    }

    // ---- HTTP/1 path (spec.md §4.1 "HTTP/1 path") ----

    fn drive_http1_ready(&mut self, sink: &mut impl EventSink) -> Result<usize> {
        while !self.inbound.is_empty() && (self.inbound.as_slice()[0] == b'\r' || self.inbound.as_slice()[0] == b'\n') {
            self.inbound.discard(1);
        }
        if self.inbound.is_empty() {
            return Ok(0);
        }
        if self.role == Role::Server && frame::is_h2_preface(self.inbound.as_slice()) {
            self.inbound.discard(CONNECTION_PREFACE.len());
            self.state = State::ReadyNoSettings;
            return Ok(CONNECTION_PREFACE.len());
        }

        let before = self.inbound.len();
        let parsed = if self.role == Role::Server {
            self.handle_http1_request(sink)?
        } else {
            self.handle_http1_response(sink)?
        };
        Ok(if parsed { before - self.inbound.len() } else { 0 })
    }

    fn handle_http1_request(&mut self, sink: &mut impl EventSink) -> Result<bool> {
        let parsed = match http1::parse_request(self.inbound.as_slice())? {
            Some(p) => p,
            None => return Ok(false),
        };
        self.inbound.discard(parsed.consumed);

        let id = self.allocate_remote_stream();
        self.http1_current_stream = id;
        sink.on_stream_start(id);
        sink.on_message_start(id, &Message { headers: parsed.headers });

        let upgrading_to_h2c = matches!(parsed.upgrade, Some(Upgrade::H2c));
        match parsed.upgrade {
            Some(Upgrade::H2c) => {
                self.write_raw(sink, b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n");
                sink.on_upgrade();
                self.send_preface_and_settings(sink);
                self.post_body_state = Some(State::Preface);
            }
            Some(Upgrade::Other) if self.unknown_protocol_upgrades => {
                self.pending_upgrade_body_mode = parsed.body_mode;
                self.state = State::UnknownProtocolUpgrade;
                // Signals "decision needed" the same way the h2c branch's
                // on_upgrade() signals "upgrade happened" — the embedder
                // resolves it out of band via accept/reject, since it
                // cannot safely re-enter `self` from inside this callback.
                sink.on_upgrade();
                return Ok(true);
            }
            Some(Upgrade::Other) | None => {}
        }

        self.begin_http1_body(parsed.body_mode, sink, upgrading_to_h2c)
    }

    /// Resolve a `UNKNOWN_PROTOCOL_UPGRADE` pause by accepting the
    /// non-h2c protocol the client asked for (spec.md §4.1). `response`
    /// is the full HTTP/1 response the embedder wants to send — normally
    /// a `101 Switching Protocols` with whatever protocol-specific
    /// headers it requires, since the engine has no opinion on any
    /// upgrade target besides h2c. Once sent, the connection becomes an
    /// opaque byte tunnel (`UNKNOWN_PROTOCOL`): inbound bytes are handed
    /// to `on_message_data` on stream 1 and outbound bytes are written
    /// with `write_raw`.
    pub fn accept_unknown_protocol_upgrade(&mut self, response: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if self.state != State::UnknownProtocolUpgrade {
            return Err(Error::assertion("accept_unknown_protocol_upgrade called outside UNKNOWN_PROTOCOL_UPGRADE"));
        }
        self.write_raw(sink, response);
        self.state = State::UnknownProtocol;
        Ok(())
    }

    /// Resolve a `UNKNOWN_PROTOCOL_UPGRADE` pause by declining the
    /// upgrade; the request that asked for it is processed as an
    /// ordinary HTTP/1 message (its body, if any, is drained as usual)
    /// and the connection returns to `HTTP1_READY` once it completes.
    pub fn reject_unknown_protocol_upgrade(&mut self, sink: &mut impl EventSink) -> Result<()> {
        if self.state != State::UnknownProtocolUpgrade {
            return Err(Error::assertion("reject_unknown_protocol_upgrade called outside UNKNOWN_PROTOCOL_UPGRADE"));
        }
        self.begin_http1_body(self.pending_upgrade_body_mode, sink, false)?;
        Ok(())
    }

    fn handle_http1_response(&mut self, sink: &mut impl EventSink) -> Result<bool> {
        let (code, headers, body_mode, consumed) = match http1::parse_response(self.inbound.as_slice())? {
            Some(p) => p,
            None => return Ok(false),
        };
        self.inbound.discard(consumed);
        let id = self.http1_current_stream.max(1);
        sink.on_message_start(id, &Message { headers });
        let _ = code;
        self.begin_http1_body(body_mode, sink, false)
    }

    fn begin_http1_body(&mut self, mode: BodyMode, sink: &mut impl EventSink, upgrading: bool) -> Result<bool> {
        let reading_state = if upgrading { State::Http1ReadingUpgrade } else { State::Http1Reading };
        match mode {
            BodyMode::None | BodyMode::ContentLength(0) => {
                self.finish_http1_message(sink);
            }
            BodyMode::ContentLength(n) => {
                self.http1_body_remaining = BodyRemaining::Exact(n);
                self.state = reading_state;
            }
            BodyMode::Chunked => {
                self.http1_body_remaining = BodyRemaining::Chunked;
                self.state = reading_state;
            }
        }
        Ok(true)
    }

    fn drive_http1_body(&mut self, sink: &mut impl EventSink) -> Result<usize> {
        let id = self.http1_current_stream;
        match self.http1_body_remaining {
            BodyRemaining::None => {
                self.finish_http1_message(sink);
                Ok(0)
            }
            BodyRemaining::Exact(remaining) => {
                if self.inbound.is_empty() {
                    return Ok(0);
                }
                let take = remaining.min(self.inbound.len() as u64) as usize;
                let chunk = self.inbound.shift(take);
                sink.on_message_data(id, &chunk);
                let left = remaining - take as u64;
                self.http1_body_remaining = BodyRemaining::Exact(left);
                if left == 0 {
                    self.finish_http1_message(sink);
                }
                Ok(take)
            }
            BodyRemaining::Chunked => {
                match http1::decode_chunk(self.inbound.as_slice())? {
                    None => Ok(0),
                    Some((range, consumed, is_last)) => {
                        if !range.is_empty() {
                            let data = self.inbound.as_slice()[range].to_vec();
                            sink.on_message_data(id, &data);
                        }
                        self.inbound.discard(consumed);
                        if is_last {
                            self.finish_http1_message(sink);
                        }
                        Ok(consumed)
                    }
                }
            }
        }
    }

    fn finish_http1_message(&mut self, sink: &mut impl EventSink) {
        let id = self.http1_current_stream;
        sink.on_message_end(id);
        sink.on_stream_end(id);
        self.http1_body_remaining = BodyRemaining::None;
        self.state = self.post_body_state.take().unwrap_or(State::Http1Ready);
    }

    fn write_raw(&mut self, sink: &mut impl EventSink, bytes: &[u8]) {
        sink.on_write(bytes);
    }

    // ---- HTTP/2 path (spec.md §4.1 "HTTP/2 path", §4.2) ----

    fn drive_http2(&mut self, sink: &mut impl EventSink) -> Result<usize> {
        if self.inbound.len() < frame::FRAME_HEADER_LEN {
            return Ok(0);
        }
        let header = FrameHeader::parse(self.inbound.as_slice()).expect("checked length above");
        if header.length > self.local.max_frame_size {
            self.fatal(sink, error_code::FRAME_SIZE_ERROR, 0, "frame exceeds local max_frame_size")?;
            return Ok(0);
        }
        if self.inbound.len() < header.total_size() {
            return Ok(0);
        }
        if self.state == State::ReadyNoSettings && header.frame_type != frame_type::SETTINGS {
            self.fatal(sink, error_code::PROTOCOL_ERROR, 0, "first frame must be SETTINGS")?;
            return Ok(0);
        }
        self.state = State::Ready;

        if let Some(cont) = &self.continued {
            if header.frame_type != frame_type::CONTINUATION || header.stream_id != cont.stream_id {
                self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "expected CONTINUATION")?;
                return Ok(0);
            }
        }

        let total = header.total_size();
        let payload = self.inbound.as_slice()[frame::FRAME_HEADER_LEN..total].to_vec();
        self.inbound.discard(total);

        self.dispatch_frame(header, &payload, sink)?;
        Ok(total)
    }

    fn dispatch_frame(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        match header.frame_type {
            frame_type::DATA => self.handle_data(header, payload, sink),
            frame_type::HEADERS => self.handle_headers(header, payload, sink),
            frame_type::PUSH_PROMISE => self.handle_push_promise(header, payload, sink),
            frame_type::CONTINUATION => self.handle_continuation(header, payload, sink),
            frame_type::SETTINGS => self.handle_settings(header, payload, sink),
            frame_type::WINDOW_UPDATE => self.handle_window_update(header, payload, sink),
            frame_type::PING => self.handle_ping(header, payload, sink),
            frame_type::GOAWAY => self.handle_goaway(header, payload),
            frame_type::RST_STREAM => self.handle_rst_stream(header, payload, sink),
            frame_type::PRIORITY => self.handle_priority(header, payload, sink),
            t if t >= 10 => Ok(()),
            _ => Ok(()),
        }
    }

    fn handle_data(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        let data = frame::data_payload(&header, payload)?;

        if !data.is_empty() {
            let mut out = Vec::new();
            emit_window_update(&mut out, 0, data.len() as u32);
            sink.on_write(&out);
        }

        let recently_reset = self.streams.was_recently_reset(header.stream_id);
        let stream = match self.streams.get_mut(header.stream_id) {
            Some(s) => s,
            None if recently_reset => return Ok(()),
            None => return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "DATA on unknown stream"),
        };
        if !stream.accept.contains(Accept::DATA) {
            return self.reset_stream(header.stream_id, error_code::STREAM_CLOSED, sink);
        }

        if !data.is_empty() {
            sink.on_message_data(header.stream_id, &data);
            if !self.manual_flow_control {
                let mut out = Vec::new();
                emit_window_update(&mut out, header.stream_id, data.len() as u32);
                sink.on_write(&out);
            }
        }

        if header.is_end_stream() {
            self.end_stream_inbound(header.stream_id, sink);
        }
        Ok(())
    }

    fn handle_headers(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        let (priority, block) = frame::headers_payload(&header, payload)?;
        if let Some(p) = priority {
            if p.dependency == header.stream_id {
                return self.reset_stream(header.stream_id, error_code::PROTOCOL_ERROR, sink);
            }
        }

        let is_trailers;
        let is_nop;
        if let Some(stream) = self.streams.get(header.stream_id) {
            if stream.accept.contains(Accept::TRAILERS) {
                if !header.is_end_stream() {
                    return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "trailers must carry END_STREAM");
                }
                is_trailers = true;
                is_nop = false;
            } else if stream.accept.contains(Accept::NOP_HEADERS) {
                is_trailers = false;
                is_nop = true;
            } else if stream.accept.contains(Accept::HEADERS) {
                is_trailers = false;
                is_nop = false;
            } else {
                return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "HEADERS not accepted on this stream");
            }
        } else if self.role == Role::Server {
            if self.stream_count_remote >= self.local.max_concurrent_streams {
                return self.fatal(sink, error_code::REFUSED_STREAM, header.stream_id, "peer exceeded our advertised max_concurrent_streams");
            }
            let accept = Accept::HEADERS | Accept::DATA | Accept::TRAILERS | Accept::WRITE_HEADERS | Accept::WRITE_DATA;
            let stream = Stream::new(header.stream_id, accept, self.remote.initial_window_size as i64, self.local.initial_window_size as i64)
                .remote_initiated(true);
            self.streams.insert(stream);
            self.last_stream_remote = self.last_stream_remote.max(header.stream_id);
            self.stream_count_remote += 1;
            sink.on_stream_start(header.stream_id);
            is_trailers = false;
            is_nop = false;
        } else {
            return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "HEADERS on unknown client stream");
        }

        self.continued = Some(Continued {
            stream_id: header.stream_id,
            promise_id: 0,
            end_stream: header.is_end_stream(),
            is_trailers,
            is_nop,
            buf: block.to_vec(),
        });
        if header.is_end_headers() {
            self.finish_header_block(sink)?;
        }
        Ok(())
    }

    fn handle_push_promise(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if !self.local.enable_push {
            return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "PUSH_PROMISE while push disabled");
        }
        let stream = self
            .streams
            .get(header.stream_id)
            .ok_or_else(|| Error::invalid_stream("PUSH_PROMISE on unknown stream"))?;
        if !stream.accept.contains(Accept::PUSH) {
            return self.reset_stream(header.stream_id, error_code::PROTOCOL_ERROR, sink);
        }
        if self.stream_count_remote >= self.local.max_concurrent_streams {
            return self.fatal(sink, error_code::REFUSED_STREAM, header.stream_id, "peer exceeded our advertised max_concurrent_streams");
        }
        let (promised, block) = frame::push_promise_payload(&header, payload)?;
        let accept = Accept::HEADERS | Accept::DATA | Accept::TRAILERS;
        self.streams.insert(Stream::new(promised, accept, 0, self.local.initial_window_size as i64).remote_initiated(true));
        self.stream_count_remote += 1;
        sink.on_stream_start(promised);

        self.continued = Some(Continued {
            stream_id: header.stream_id,
            promise_id: promised,
            end_stream: false,
            is_trailers: false,
            is_nop: false,
            buf: block.to_vec(),
        });
        if header.is_end_headers() {
            self.finish_header_block(sink)?;
        }
        Ok(())
    }

    fn handle_continuation(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        let max_total = (MAX_CONTINUATIONS as u32 + 1) * self.local.max_frame_size;
        let cont = self.continued.as_mut().expect("checked by caller");
        if cont.buf.len() + payload.len() > max_total as usize {
            return self.fatal(sink, error_code::ENHANCE_YOUR_CALM, header.stream_id, "continuation block too large");
        }
        cont.buf.extend_from_slice(payload);
        if header.is_end_headers() {
            self.finish_header_block(sink)?;
        }
        Ok(())
    }

    fn finish_header_block(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let cont = self.continued.take().expect("checked by caller");
        let headers = match self.decoder.decode(&cont.buf) {
            Ok(h) => h,
            Err(_) => return self.fatal_from(sink, Error::compression("HPACK decode failed")),
        };

        if cont.is_nop {
            // Stream was already locally reset; headers are decoded only to
            // keep HPACK dynamic-table state in sync with the peer, then
            // dropped (spec.md §3 "NOP_HEADERS").
            self.forget_stream(cont.stream_id);
            sink.on_stream_end(cont.stream_id);
            return Ok(());
        }

        if let Err(reason) = validate_header_block(&headers, self.role, cont.is_trailers) {
            trace!(stream = cont.stream_id, reason, "header block failed validation, resetting stream");
            return self.reset_stream(cont.stream_id, error_code::PROTOCOL_ERROR, sink);
        }

        let msg = Message { headers };
        if cont.promise_id != 0 {
            sink.on_message_push(cont.stream_id, &msg, cont.promise_id);
        } else if cont.is_trailers {
            sink.on_message_trail(cont.stream_id, &msg);
        } else {
            sink.on_message_start(cont.stream_id, &msg);
        }

        if let Some(stream) = self.streams.get_mut(cont.stream_id) {
            stream.accept.remove(Accept::HEADERS);
            stream.accept.remove(Accept::NOP_HEADERS);
            if cont.is_trailers {
                stream.accept.remove(Accept::TRAILERS);
            } else {
                stream.accept.insert(Accept::TRAILERS);
            }
            stream.headers_seen = true;
        }
        if cont.end_stream {
            self.end_stream_inbound(cont.stream_id, sink);
        }
        Ok(())
    }

    fn handle_settings(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if header.stream_id != 0 {
            return self.fatal(sink, error_code::PROTOCOL_ERROR, 0, "SETTINGS on non-zero stream");
        }
        if header.is_ack() {
            if !payload.is_empty() {
                return self.fatal(sink, error_code::FRAME_SIZE_ERROR, 0, "SETTINGS ACK must be empty");
            }
            return Ok(());
        }
        let entries = match Settings::parse_payload(payload) {
            Ok(e) => e,
            Err(e) => return self.fatal_from(sink, e),
        };
        for (id, value) in entries {
            if let Err(e) = self.remote.apply(id, value) {
                return self.fatal_from(sink, e);
            }
            if id == settings_id::HEADER_TABLE_SIZE {
                self.encoder.set_limit(value);
            }
        }
        let mut out = Vec::new();
        FrameHeader::write(frame_type::SETTINGS, flags::ACK, 0, 0, &mut out);
        sink.on_write(&out);
        sink.on_settings();
        debug!(remote_max_frame_size = self.remote.max_frame_size, "applied remote SETTINGS");
        Ok(())
    }

    fn handle_window_update(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if payload.len() != 4 {
            return self.fatal(sink, error_code::FRAME_SIZE_ERROR, header.stream_id, "WINDOW_UPDATE must be 4 bytes");
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let increment = raw & 0x7FFF_FFFF;
        if increment == 0 {
            return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "zero WINDOW_UPDATE increment");
        }
        if header.stream_id == 0 {
            self.conn_send_window += increment as i64;
            if self.conn_send_window > i32::MAX as i64 {
                return self.fatal(sink, error_code::FLOW_CONTROL_ERROR, 0, "connection window overflow");
            }
        } else {
            let recently_reset = self.streams.was_recently_reset(header.stream_id);
            match self.streams.get_mut(header.stream_id) {
                Some(stream) => {
                    stream.send_window += increment as i64;
                    if stream.send_window > i32::MAX as i64 {
                        return self.reset_stream(header.stream_id, error_code::FLOW_CONTROL_ERROR, sink);
                    }
                }
                None if recently_reset => return Ok(()),
                None => return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "WINDOW_UPDATE on unknown stream"),
            }
        }
        sink.on_flow_increase(header.stream_id);
        Ok(())
    }

    fn handle_ping(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if header.stream_id != 0 || payload.len() != 8 {
            return self.fatal(sink, error_code::FRAME_SIZE_ERROR, 0, "malformed PING");
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(payload);
        if header.is_ack() {
            sink.on_pong(bytes);
        } else {
            let mut out = Vec::new();
            FrameHeader::write(frame_type::PING, flags::ACK, 0, 8, &mut out);
            out.extend_from_slice(&bytes);
            sink.on_write(&out);
        }
        Ok(())
    }

    fn handle_goaway(&mut self, header: FrameHeader, payload: &[u8]) -> Result<()> {
        if header.stream_id != 0 || payload.len() < 8 {
            return Err(Error::protocol_error("malformed GOAWAY"));
        }
        let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        self.state = State::Undefined;
        // spec.md §9 open question: non-zero code surfaces as Transport,
        // matching the source rather than a clean Disconnect.
        if code != 0 {
            Err(Error::transport(code, "peer sent GOAWAY"))
        } else {
            Err(Error::Disconnect)
        }
    }

    fn handle_rst_stream(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if payload.len() != 4 {
            return self.fatal(sink, error_code::FRAME_SIZE_ERROR, header.stream_id, "RST_STREAM must be 4 bytes");
        }
        let recently_reset = self.streams.was_recently_reset(header.stream_id);
        if self.streams.get(header.stream_id).is_none() {
            if recently_reset {
                return Ok(());
            }
            return self.fatal(sink, error_code::PROTOCOL_ERROR, header.stream_id, "RST_STREAM on unknown stream");
        }
        self.forget_stream(header.stream_id);
        sink.on_stream_end(header.stream_id);
        Ok(())
    }

    fn handle_priority(&mut self, header: FrameHeader, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if payload.len() != 5 {
            return self.fatal(sink, error_code::FRAME_SIZE_ERROR, header.stream_id, "PRIORITY must be 5 bytes");
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let dependency = raw & 0x7FFF_FFFF;
        if dependency == header.stream_id {
            return self.reset_stream(header.stream_id, error_code::PROTOCOL_ERROR, sink);
        }
        // Parsed and self-check performed; stream prioritization is a
        // declared non-goal (spec.md §1, §9).
        Ok(())
    }

    /// Remove a stream and credit its slot back to whichever side's
    /// `stream_count` it was charged against (spec.md §3 invariant (iv)).
    fn forget_stream(&mut self, id: u32) -> Option<Stream> {
        let removed = self.streams.remove(id);
        if let Some(stream) = &removed {
            if stream.remote_initiated {
                self.stream_count_remote = self.stream_count_remote.saturating_sub(1);
            } else {
                self.stream_count_local = self.stream_count_local.saturating_sub(1);
            }
        }
        removed
    }

    fn end_stream_inbound(&mut self, id: u32, sink: &mut impl EventSink) {
        if let Some(stream) = self.streams.get_mut(id) {
            stream.accept.remove(Accept::DATA);
            stream.accept.remove(Accept::TRAILERS);
            sink.on_message_end(id);
            if stream.accept.is_done() {
                self.forget_stream(id);
                sink.on_stream_end(id);
            }
        }
    }

    fn reset_stream(&mut self, id: u32, code: u32, sink: &mut impl EventSink) -> Result<()> {
        let mut out = Vec::new();
        FrameHeader::write(frame_type::RST_STREAM, 0, id, 4, &mut out);
        out.extend_from_slice(&code.to_be_bytes());
        sink.on_write(&out);
        if self.forget_stream(id).is_some() {
            sink.on_stream_end(id);
        }
        Ok(())
    }

    fn fatal(&mut self, sink: &mut impl EventSink, code: u32, stream: u32, reason: &'static str) -> Result<()> {
        self.fatal_from(sink, Error::transport(code, reason))
    }

    fn fatal_from(&mut self, sink: &mut impl EventSink, err: Error) -> Result<()> {
        warn!(?err, "connection-fatal error");
        if let Some(code) = err.wire_code() {
            let mut out = Vec::new();
            let mut payload = Vec::with_capacity(8);
            payload.extend_from_slice(&(self.last_stream_remote & 0x7FFF_FFFF).to_be_bytes());
            payload.extend_from_slice(&code.to_be_bytes());
            FrameHeader::write(frame_type::GOAWAY, 0, 0, payload.len(), &mut out);
            out.extend_from_slice(&payload);
            sink.on_write(&out);
        }
        self.state = State::Undefined;
        Err(err)
    }

    // ---- Write path (spec.md §4.5) ----

    pub fn next_stream_id(&mut self) -> u32 {
        let next = if self.last_stream_local == 0 {
            if self.role == Role::Client { 1 } else { 2 }
        } else {
            self.last_stream_local + 2
        };
        self.last_stream_local = next;
        next
    }

    pub fn write_message(&mut self, stream: u32, msg: &Message, final_: bool, sink: &mut impl EventSink) -> Result<()> {
        match self.state {
            State::Http1Ready | State::Http1Reading | State::Http1ReadingUpgrade => self.write_message_http1(msg, final_, sink),
            _ => self.write_message_http2(stream, msg, final_, sink),
        }
    }

    fn write_message_http2(&mut self, stream: u32, msg: &Message, final_: bool, sink: &mut impl EventSink) -> Result<()> {
        let is_informational = msg
            .headers
            .iter()
            .find(|h| h.name == b":status")
            .and_then(|h| h.value_str().parse::<u16>().ok())
            .map(|code| (100..200).contains(&code))
            .unwrap_or(false);
        if is_informational && final_ {
            return Err(Error::assertion("informational responses cannot carry END_STREAM"));
        }

        // Locally-initiated streams are created on first write (spec.md
        // §3 "Lifecycle"); a stream already known here was opened by an
        // inbound HEADERS (we're answering a request, or sending
        // trailers).
        if self.streams.get(stream).is_none() {
            if self.stream_count_local >= self.remote.max_concurrent_streams {
                return Err(Error::would_block("local max_concurrent_streams budget exhausted"));
            }
            let accept = Accept::WRITE_HEADERS | Accept::WRITE_DATA | Accept::HEADERS | Accept::DATA | Accept::TRAILERS;
            self.streams.insert(Stream::new(
                stream,
                accept,
                self.remote.initial_window_size as i64,
                self.local.initial_window_size as i64,
            ));
            self.stream_count_local += 1;
        }

        let block = self.encoder.encode(&msg.headers);
        let mut out = Vec::new();
        frame::emit_header_block(&mut out, frame_type::HEADERS, stream, &[], &block, final_, self.remote.max_frame_size);
        sink.on_write(&out);

        if final_ {
            if let Some(s) = self.streams.get_mut(stream) {
                s.accept.remove(Accept::WRITE_HEADERS);
                s.accept.remove(Accept::WRITE_DATA);
            }
        }
        Ok(())
    }

    fn write_message_http1(&mut self, msg: &Message, final_: bool, sink: &mut impl EventSink) -> Result<()> {
        let mut line = Vec::new();
        let mut body_headers = Vec::new();
        let mut has_content_length = false;
        let mut has_upgrade = false;
        let mut has_connection = false;

        if self.role == Role::Server {
            let status = msg
                .headers
                .iter()
                .find(|h| h.name == b":status")
                .map(|h| h.value_str().to_string())
                .unwrap_or_else(|| "200".to_string());
            line.extend_from_slice(format!("HTTP/1.1 {status} \r\n").as_bytes());
        } else {
            let method = msg.headers.iter().find(|h| h.name == b":method").map(|h| h.value_str()).unwrap_or("GET");
            let path = msg.headers.iter().find(|h| h.name == b":path").map(|h| h.value_str()).unwrap_or("/");
            line.extend_from_slice(format!("{method} {path} HTTP/1.1\r\n").as_bytes());
        }

        for h in &msg.headers {
            if h.is_pseudo() {
                if h.name == b":authority" {
                    body_headers.extend_from_slice(b"Host: ");
                    body_headers.extend_from_slice(&h.value);
                    body_headers.extend_from_slice(b"\r\n");
                }
                continue;
            }
            if h.name.eq_ignore_ascii_case(b"content-length") {
                has_content_length = true;
            }
            if h.name.eq_ignore_ascii_case(b"upgrade") {
                has_upgrade = true;
            }
            if h.name.eq_ignore_ascii_case(b"connection") {
                has_connection = true;
            }
            body_headers.extend_from_slice(&h.name);
            body_headers.extend_from_slice(b": ");
            body_headers.extend_from_slice(&h.value);
            body_headers.extend_from_slice(b"\r\n");
        }

        let chunked = !has_content_length && !has_upgrade && !final_;
        if chunked {
            body_headers.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        if !has_connection {
            body_headers.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        body_headers.extend_from_slice(b"\r\n");

        line.extend_from_slice(&body_headers);
        sink.on_write(&line);
        Ok(())
    }

    pub fn write_data(&mut self, stream: u32, bytes: &[u8], final_: bool, sink: &mut impl EventSink) -> Result<(usize, bool)> {
        if !matches!(self.state, State::Init | State::ReadyNoSettings | State::Ready) {
            return self.write_data_http1(bytes, final_, sink);
        }
        if self.conn_send_window <= 0 {
            return Ok((0, false));
        }
        let stream_window = self.streams.get(stream).map(|s| s.send_window).unwrap_or(0);
        if stream_window <= 0 {
            return Ok((0, false));
        }
        let cap = (self.conn_send_window.min(stream_window)).max(0) as usize;
        let to_send = bytes.len().min(cap);
        let forced_final = to_send == bytes.len() && final_;

        let mut out = Vec::new();
        frame::emit_data(&mut out, stream, &bytes[..to_send], forced_final, self.remote.max_frame_size);
        sink.on_write(&out);

        self.conn_send_window -= to_send as i64;
        if let Some(s) = self.streams.get_mut(stream) {
            s.send_window -= to_send as i64;
            if forced_final {
                s.accept.remove(Accept::WRITE_DATA);
            }
        }
        Ok((to_send, forced_final))
    }

    fn write_data_http1(&mut self, bytes: &[u8], final_: bool, sink: &mut impl EventSink) -> Result<(usize, bool)> {
        let mut out = Vec::new();
        http1::encode_chunk(bytes, &mut out);
        if final_ {
            http1::encode_chunk(&[], &mut out);
        }
        sink.on_write(&out);
        Ok((bytes.len(), final_))
    }

    pub fn write_push(&mut self, parent: u32, msg: &Message, sink: &mut impl EventSink) -> Result<Option<u32>> {
        if !self.local.enable_push {
            return Ok(None);
        }
        if self.stream_count_local >= self.remote.max_concurrent_streams {
            return Err(Error::would_block("local max_concurrent_streams budget exhausted"));
        }
        let child = self.next_stream_id();
        let accept = Accept::WRITE_HEADERS | Accept::WRITE_DATA;
        self.streams.insert(Stream::new(child, accept, self.remote.initial_window_size as i64, 0));
        self.stream_count_local += 1;

        let mut prefix = Vec::new();
        prefix.extend_from_slice(&(child & 0x7FFF_FFFF).to_be_bytes());
        let block = self.encoder.encode(&msg.headers);
        let mut out = Vec::new();
        frame::emit_header_block(&mut out, frame_type::PUSH_PROMISE, parent, &prefix, &block, false, self.remote.max_frame_size);
        sink.on_write(&out);

        sink.on_stream_start(child);
        sink.on_message_start(child, msg);
        sink.on_message_end(child);
        Ok(Some(child))
    }

    pub fn write_reset(&mut self, stream: u32, code: u32, sink: &mut impl EventSink) -> Result<()> {
        if !matches!(self.state, State::Init | State::ReadyNoSettings | State::Ready) {
            self.state = State::Undefined;
            return Ok(());
        }
        if stream == 0 {
            self.fatal(sink, code, 0, "local write_reset(0, ..)")?;
            return Ok(());
        }
        let headers_done = self.streams.get(stream).map(|s| !s.accept.contains(Accept::HEADERS)).unwrap_or(true);
        let mut out = Vec::new();
        FrameHeader::write(frame_type::RST_STREAM, 0, stream, 4, &mut out);
        out.extend_from_slice(&code.to_be_bytes());
        sink.on_write(&out);

        if headers_done {
            self.forget_stream(stream);
        } else if let Some(s) = self.streams.get_mut(stream) {
            s.accept.remove(Accept::HEADERS);
            s.accept.insert(Accept::NOP_HEADERS);
        }
        Ok(())
    }

    pub fn write_ping(&mut self, payload: [u8; 8], sink: &mut impl EventSink) -> Result<()> {
        let mut out = Vec::new();
        FrameHeader::write(frame_type::PING, 0, 0, 8, &mut out);
        out.extend_from_slice(&payload);
        sink.on_write(&out);
        Ok(())
    }

    /// Send bytes on the opaque `UNKNOWN_PROTOCOL` tunnel entered via
    /// [`Self::accept_unknown_protocol_upgrade`]. The engine does not
    /// interpret or frame these bytes in any way.
    pub fn write_tunnel(&mut self, bytes: &[u8], sink: &mut impl EventSink) -> Result<()> {
        if self.state != State::UnknownProtocol {
            return Err(Error::assertion("write_tunnel called outside UNKNOWN_PROTOCOL"));
        }
        self.write_raw(sink, bytes);
        Ok(())
    }

    /// `write_frame(frame)`: the low-level escape hatch for sending an
    /// arbitrary pre-built frame, used by embedders that need a frame
    /// type this engine doesn't construct on its own behalf.
    pub fn write_frame(&mut self, frame_type: u8, flags: u8, stream: u32, payload: &[u8], sink: &mut impl EventSink) -> Result<()> {
        let mut out = Vec::new();
        frame::emit_whole_frame(&mut out, frame_type, flags, stream, payload, self.remote.max_frame_size)?;
        sink.on_write(&out);
        Ok(())
    }

    pub fn increase_flow_window(&mut self, stream: u32, bytes: u32, sink: &mut impl EventSink) -> Result<()> {
        let mut out = Vec::new();
        emit_window_update(&mut out, stream, bytes);
        sink.on_write(&out);
        if stream == 0 {
            self.conn_recv_window += bytes as i64;
        } else if let Some(s) = self.streams.get_mut(stream) {
            s.recv_window += bytes as i64;
        }
        Ok(())
    }

    fn allocate_remote_stream(&mut self) -> u32 {
        let next = if self.last_stream_remote == 0 {
            if self.role == Role::Server { 1 } else { 2 }
        } else {
            self.last_stream_remote + 2
        };
        self.last_stream_remote = next;
        next
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }
}

fn emit_window_update(out: &mut Vec<u8>, stream: u32, increment: u32) {
    FrameHeader::write(frame_type::WINDOW_UPDATE, 0, stream, 4, out);
    out.extend_from_slice(&(increment & 0x7FFF_FFFF).to_be_bytes());
}

/// Header-block validation (spec.md §4.2 "Header-block validation").
fn validate_header_block(headers: &[Header], role: Role, is_trailers: bool) -> std::result::Result<(), &'static str> {
    if is_trailers {
        if headers.iter().any(|h| h.is_pseudo()) {
            return Err("trailers must not contain pseudo-headers");
        }
        return Ok(());
    }

    let mut seen_regular = false;
    let mut status_count = 0;
    let mut method_count = 0;
    let mut path_ok = false;
    let mut scheme_count = 0;
    let mut authority_count = 0;

    for h in headers {
        if h.is_pseudo() {
            if seen_regular {
                return Err("pseudo-header after regular header");
            }
            match h.name.as_slice() {
                b":status" => {
                    status_count += 1;
                    if !h.value.iter().all(u8::is_ascii_digit) {
                        return Err(":status must be decimal digits");
                    }
                }
                b":method" => method_count += 1,
                b":path" => path_ok = !h.value.is_empty(),
                b":scheme" => scheme_count += 1,
                b":authority" => authority_count += 1,
                _ => return Err("unknown pseudo-header"),
            }
        } else {
            seen_regular = true;
            if h.name.iter().any(u8::is_ascii_uppercase) {
                return Err("header name must be lowercase");
            }
        }
    }

    match role {
        Role::Client => {
            if status_count != 1 {
                return Err("response must carry exactly one :status");
            }
        }
        Role::Server => {
            if method_count != 1 || scheme_count != 1 || !path_ok || authority_count > 1 {
                return Err("request pseudo-headers incomplete");
            }
        }
    }
    Ok(())
}
