//! End-to-end scenarios for the HTTP/2 connection state machine, the
//! literal cases a review of the wire behavior would check by hand.

use h2_sans_io::connection::{Connection, EventSink, Message, Role, State};
use h2_sans_io::frame::{self, error_code, flags, frame_type, FrameHeader};
use h2_sans_io::settings::Settings;
use h2_sans_io::{Error, Header};

#[derive(Default)]
struct Sink {
    written: Vec<u8>,
    message_starts: Vec<u32>,
    data: Vec<(u32, Vec<u8>)>,
    message_ends: Vec<u32>,
    stream_ends: Vec<u32>,
    flow_increases: Vec<u32>,
}

impl EventSink for Sink {
    fn on_write(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
    }
    fn on_message_start(&mut self, id: u32, _msg: &Message) {
        self.message_starts.push(id);
    }
    fn on_message_data(&mut self, id: u32, bytes: &[u8]) {
        self.data.push((id, bytes.to_vec()));
    }
    fn on_message_end(&mut self, id: u32) {
        self.message_ends.push(id);
    }
    fn on_stream_end(&mut self, id: u32) {
        self.stream_ends.push(id);
    }
    fn on_flow_increase(&mut self, stream_or_zero: u32) {
        self.flow_increases.push(stream_or_zero);
    }
}

fn handshaken_pair() -> (Connection, Connection, Sink, Sink) {
    let mut client = Connection::init(Role::Client);
    let mut server = Connection::init(Role::Server);
    let mut client_sink = Sink::default();
    let mut server_sink = Sink::default();
    client.on_connect(true, &mut client_sink).unwrap();
    server.on_connect(true, &mut server_sink).unwrap();
    let to_server = std::mem::take(&mut client_sink.written);
    server.consume_bytes(&to_server, &mut server_sink).unwrap();
    let to_client = std::mem::take(&mut server_sink.written);
    client.consume_bytes(&to_client, &mut client_sink).unwrap();
    assert_eq!(client.state(), State::Ready);
    assert_eq!(server.state(), State::Ready);
    (client, server, client_sink, server_sink)
}

fn req_headers() -> Vec<Header> {
    vec![
        Header::new(b":method".to_vec(), b"GET".to_vec()),
        Header::new(b":scheme".to_vec(), b"https".to_vec()),
        Header::new(b":path".to_vec(), b"/".to_vec()),
        Header::new(b":authority".to_vec(), b"x".to_vec()),
    ]
}

/// Scenario 1: GET on stream 1, 14-byte response body, END_STREAM.
#[test]
fn scenario_get_request_and_body_response() {
    let (mut client, mut server, mut client_sink, mut server_sink) = handshaken_pair();

    let stream = client.next_stream_id();
    client.write_message(stream, &Message { headers: req_headers() }, true, &mut client_sink).unwrap();
    let bytes = std::mem::take(&mut client_sink.written);
    server.consume_bytes(&bytes, &mut server_sink).unwrap();
    assert_eq!(server_sink.message_starts, vec![stream]);

    let resp = Message { headers: vec![Header::new(b":status".to_vec(), b"200".to_vec())] };
    server.write_message(stream, &resp, false, &mut server_sink).unwrap();
    server.write_data(stream, b"Hello, World!\n", true, &mut server_sink).unwrap();
    let bytes = std::mem::take(&mut server_sink.written);
    client.consume_bytes(&bytes, &mut client_sink).unwrap();

    assert_eq!(client_sink.message_starts, vec![stream]);
    assert_eq!(client_sink.data, vec![(stream, b"Hello, World!\n".to_vec())]);
    assert_eq!(client_sink.message_ends, vec![stream]);
    assert_eq!(client_sink.stream_ends, vec![stream]);
}

/// Scenario 2: HEADERS fragmented by a CONTINUATION yields one message start.
#[test]
fn scenario_fragmented_headers_yield_single_message_start() {
    let (mut client, mut server, _client_sink, mut server_sink) = handshaken_pair();

    let stream = client.next_stream_id();
    let mut encoder = h2_sans_io::HpackEncoder::new(4096);
    let block = encoder.encode(&req_headers());
    let (first, second) = block.split_at(block.len() / 2);

    let mut out = Vec::new();
    FrameHeader::write(frame_type::HEADERS, 0, stream, first.len(), &mut out);
    out.extend_from_slice(first);
    FrameHeader::write(frame_type::CONTINUATION, flags::END_HEADERS, stream, second.len(), &mut out);
    out.extend_from_slice(second);

    server.consume_bytes(&out, &mut server_sink).unwrap();
    assert_eq!(server_sink.message_starts, vec![stream]);
    let _ = client;
}

/// Scenario 3: a tiny INITIAL_WINDOW_SIZE forces a 25-byte body to split,
/// the tail waiting for a WINDOW_UPDATE.
#[test]
fn scenario_small_window_splits_and_resumes_after_window_update() {
    let (mut client, _server, mut client_sink, _server_sink) = handshaken_pair();

    // Server announces a tiny initial window before the client's first write.
    let mut small_window = Vec::new();
    let mut payload = Vec::new();
    payload.extend_from_slice(&h2_sans_io::frame::settings_id::INITIAL_WINDOW_SIZE.to_be_bytes());
    payload.extend_from_slice(&10u32.to_be_bytes());
    FrameHeader::write(frame_type::SETTINGS, 0, 0, payload.len(), &mut small_window);
    small_window.extend_from_slice(&payload);
    client.consume_bytes(&small_window, &mut client_sink).unwrap();
    std::mem::take(&mut client_sink.written); // discard the SETTINGS ACK

    let stream = client.next_stream_id();
    client.write_message(stream, &Message { headers: req_headers() }, false, &mut client_sink).unwrap();
    std::mem::take(&mut client_sink.written);

    let body = vec![0xABu8; 25];
    let (sent, final_) = client.write_data(stream, &body, true, &mut client_sink).unwrap();
    assert_eq!(sent, 10);
    assert!(!final_);
    let first_chunk = std::mem::take(&mut client_sink.written);
    let parsed = FrameHeader::parse(&first_chunk).unwrap();
    assert_eq!(parsed.length, 10);
    assert!(!parsed.is_end_stream());

    let mut window_update = Vec::new();
    FrameHeader::write(frame_type::WINDOW_UPDATE, 0, stream, 4, &mut window_update);
    window_update.extend_from_slice(&20u32.to_be_bytes());
    client.consume_bytes(&window_update, &mut client_sink).unwrap();

    let (sent2, final2) = client.write_data(stream, &body[10..], true, &mut client_sink).unwrap();
    assert_eq!(sent2, 15);
    assert!(final2);
}

/// Scenario 4: DATA on an unknown-but-recently-reset stream is silent.
#[test]
fn scenario_data_on_recently_reset_stream_is_silent() {
    let (_client, mut server, _client_sink, mut server_sink) = handshaken_pair();

    let mut headers_in = Vec::new();
    let mut encoder = h2_sans_io::HpackEncoder::new(4096);
    let block = encoder.encode(&req_headers());
    FrameHeader::write(frame_type::HEADERS, flags::END_HEADERS, 1, block.len(), &mut headers_in);
    headers_in.extend_from_slice(&block);
    server.consume_bytes(&headers_in, &mut server_sink).unwrap();

    server.write_reset(1, error_code::CANCEL, &mut server_sink).unwrap();
    std::mem::take(&mut server_sink.written);

    let mut late_data = Vec::new();
    FrameHeader::write(frame_type::DATA, 0, 1, 4, &mut late_data);
    late_data.extend_from_slice(b"late");
    server.consume_bytes(&late_data, &mut server_sink).unwrap();

    assert!(server_sink.data.is_empty());
}

/// Scenario 5: an out-of-range MAX_FRAME_SIZE is a fatal protocol error.
#[test]
fn scenario_invalid_max_frame_size_is_fatal() {
    let (_client, mut server, _client_sink, mut server_sink) = handshaken_pair();

    let mut bytes = Vec::new();
    let mut payload = Vec::new();
    payload.extend_from_slice(&h2_sans_io::frame::settings_id::MAX_FRAME_SIZE.to_be_bytes());
    payload.extend_from_slice(&16383u32.to_be_bytes());
    FrameHeader::write(frame_type::SETTINGS, 0, 0, payload.len(), &mut bytes);
    bytes.extend_from_slice(&payload);

    let err = server.consume_bytes(&bytes, &mut server_sink).unwrap_err();
    assert!(matches!(err, Error::Transport { code, .. } if code == error_code::PROTOCOL_ERROR));
}

/// Scenario 6: an h2c upgrade request gets a 101 and then the connection
/// continues in HTTP/2 mode.
#[test]
fn scenario_h2c_upgrade_then_http2_continues() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();

    let req = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nConnection: upgrade, HTTP2-Settings\r\nHTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\n\r\n";
    server.consume_bytes(req, &mut sink).unwrap();

    let written = String::from_utf8_lossy(&sink.written).to_string();
    assert!(written.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert_eq!(sink.message_starts, vec![1]);
    assert_eq!(sink.message_ends, vec![1]); // GET has no body
    assert_eq!(server.state(), State::Preface);

    server.consume_bytes(frame::CONNECTION_PREFACE, &mut sink).unwrap();
    assert_eq!(server.state(), State::ReadyNoSettings);

    let diff = Settings::default().encode_diff_from_standard();
    let mut settings_frame = Vec::new();
    FrameHeader::write(frame_type::SETTINGS, 0, 0, diff.len(), &mut settings_frame);
    settings_frame.extend_from_slice(&diff);
    server.consume_bytes(&settings_frame, &mut sink).unwrap();
    assert_eq!(server.state(), State::Ready);
}

/// A peer opening more streams than our advertised MAX_CONCURRENT_STREAMS
/// allows is a connection-fatal transport error (spec.md §3 invariant
/// (iv), SPEC_FULL.md §4 "Transport if the peer is").
#[test]
fn peer_exceeding_advertised_concurrency_limit_is_fatal() {
    let mut server = Connection::init(Role::Server);
    server.set_settings(Settings { max_concurrent_streams: 1, ..Settings::default() });
    let mut sink = Sink::default();
    server.on_connect(true, &mut sink).unwrap();
    server.consume_bytes(frame::CONNECTION_PREFACE, &mut sink).unwrap();
    let empty_settings = Vec::new();
    let mut settings_frame = Vec::new();
    FrameHeader::write(frame_type::SETTINGS, 0, 0, 0, &mut settings_frame);
    settings_frame.extend_from_slice(&empty_settings);
    server.consume_bytes(&settings_frame, &mut sink).unwrap();

    let mut encoder = h2_sans_io::HpackEncoder::new(4096);
    let mut out = Vec::new();
    let block1 = encoder.encode(&req_headers());
    FrameHeader::write(frame_type::HEADERS, flags::END_HEADERS, 1, block1.len(), &mut out);
    out.extend_from_slice(&block1);
    server.consume_bytes(&out, &mut sink).unwrap();

    let mut out2 = Vec::new();
    let block2 = encoder.encode(&req_headers());
    FrameHeader::write(frame_type::HEADERS, flags::END_HEADERS, 3, block2.len(), &mut out2);
    out2.extend_from_slice(&block2);
    let err = server.consume_bytes(&out2, &mut sink).unwrap_err();
    assert!(matches!(err, Error::Transport { code, .. } if code == error_code::REFUSED_STREAM));
}

/// Writing more locally-initiated streams than the peer's advertised
/// MAX_CONCURRENT_STREAMS allows is a `WouldBlock`, not a fatal error —
/// the caller can retry once a stream frees up (SPEC_FULL.md §4).
#[test]
fn local_write_exceeding_peer_concurrency_limit_is_would_block() {
    let (mut client, _server, mut client_sink, _server_sink) = handshaken_pair();
    let mut low_limit = Vec::new();
    let mut payload = Vec::new();
    payload.extend_from_slice(&h2_sans_io::frame::settings_id::MAX_CONCURRENT_STREAMS.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes());
    FrameHeader::write(frame_type::SETTINGS, 0, 0, payload.len(), &mut low_limit);
    low_limit.extend_from_slice(&payload);
    client.consume_bytes(&low_limit, &mut client_sink).unwrap();

    let first = client.next_stream_id();
    client.write_message(first, &Message { headers: req_headers() }, false, &mut client_sink).unwrap();
    let second = client.next_stream_id();
    let err = client
        .write_message(second, &Message { headers: req_headers() }, false, &mut client_sink)
        .unwrap_err();
    assert!(matches!(err, Error::WouldBlock { .. }));
}
