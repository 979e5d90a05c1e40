//! HTTP/1.x compatibility mode driven through the full `Connection`,
//! not just the `http1` parsing helpers in isolation.

use h2_sans_io::connection::{Connection, EventSink, Message, Role, State};
use h2_sans_io::Header;

#[derive(Default)]
struct Sink {
    written: Vec<u8>,
    message_starts: Vec<(u32, Vec<(Vec<u8>, Vec<u8>)>)>,
    data: Vec<(u32, Vec<u8>)>,
    message_ends: Vec<u32>,
}

impl EventSink for Sink {
    fn on_write(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
    }
    fn on_message_start(&mut self, id: u32, msg: &Message) {
        self.message_starts.push((id, msg.headers.iter().map(|h| (h.name.clone(), h.value.clone())).collect()));
    }
    fn on_message_data(&mut self, id: u32, bytes: &[u8]) {
        self.data.push((id, bytes.to_vec()));
    }
    fn on_message_end(&mut self, id: u32) {
        self.message_ends.push(id);
    }
}

#[test]
fn get_request_with_no_body_completes_immediately() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();
    server.consume_bytes(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n", &mut sink).unwrap();

    assert_eq!(sink.message_starts.len(), 1);
    let (id, headers) = &sink.message_starts[0];
    assert_eq!(*id, 1);
    assert!(headers.iter().any(|(n, v)| n == b":authority" && v == b"example.com"));
    assert_eq!(sink.message_ends, vec![1]);
}

#[test]
fn content_length_body_is_delivered_then_message_ends() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();
    let req = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
    server.consume_bytes(req, &mut sink).unwrap();

    assert_eq!(sink.data, vec![(1, b"hello".to_vec())]);
    assert_eq!(sink.message_ends, vec![1]);
}

#[test]
fn chunked_body_across_multiple_consume_calls() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();
    let head = b"POST /submit HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n";
    server.consume_bytes(head, &mut sink).unwrap();
    server.consume_bytes(b"5\r\nhello\r\n", &mut sink).unwrap();
    assert_eq!(sink.data, vec![(1, b"hello".to_vec())]);
    assert!(sink.message_ends.is_empty());
    server.consume_bytes(b"0\r\n\r\n", &mut sink).unwrap();
    assert_eq!(sink.message_ends, vec![1]);
}

#[test]
fn h2c_upgrade_drains_original_body_before_preface() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();

    let req = b"POST /upload HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nConnection: upgrade, HTTP2-Settings\r\nHTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\nContent-Length: 3\r\n\r\nabc";
    server.consume_bytes(req, &mut sink).unwrap();

    assert_eq!(sink.data, vec![(1, b"abc".to_vec())]);
    assert_eq!(sink.message_ends, vec![1]);
    assert_eq!(server.state(), State::Preface);
    assert!(String::from_utf8_lossy(&sink.written).starts_with("HTTP/1.1 101"));
}

#[test]
fn unregistered_unknown_protocol_upgrade_is_ignored() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.on_connect(false, &mut sink).unwrap();

    let req = b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n";
    server.consume_bytes(req, &mut sink).unwrap();
    assert_eq!(server.state(), State::Http1Ready);
    assert_eq!(sink.message_starts.len(), 1);
    assert_eq!(sink.message_ends, vec![1]);
}

#[test]
fn unknown_protocol_upgrade_awaits_decision_then_tunnels() {
    let mut server = Connection::init(Role::Server);
    let mut sink = Sink::default();
    server.set_unknown_protocol_upgrades(true);
    server.on_connect(false, &mut sink).unwrap();

    let req = b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n";
    server.consume_bytes(req, &mut sink).unwrap();
    assert_eq!(server.state(), State::UnknownProtocolUpgrade);
    assert_eq!(sink.message_starts.len(), 1); // headers delivered; body/response still pending
    assert!(sink.written.is_empty()); // no HTTP/1 response sent until the embedder decides

    server
        .accept_unknown_protocol_upgrade(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
            &mut sink,
        )
        .unwrap();
    assert_eq!(server.state(), State::UnknownProtocol);
    assert!(String::from_utf8_lossy(&sink.written).starts_with("HTTP/1.1 101"));

    server.consume_bytes(b"\x01\x02\x03", &mut sink).unwrap();
    assert_eq!(sink.data, vec![(1, vec![1, 2, 3])]);
}

#[test]
fn client_writes_request_without_chunked_when_final() {
    let mut client = Connection::init(Role::Client);
    let mut sink = Sink::default();
    client.on_connect(false, &mut sink).unwrap();
    let msg = Message {
        headers: vec![
            Header::new(b":method".to_vec(), b"GET".to_vec()),
            Header::new(b":path".to_vec(), b"/".to_vec()),
            Header::new(b":authority".to_vec(), b"example.com".to_vec()),
        ],
    };
    client.write_message(1, &msg, true, &mut sink).unwrap();
    let text = String::from_utf8_lossy(&sink.written).to_string();
    assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    assert!(text.contains("Host: example.com\r\n"));
    assert!(!text.contains("Transfer-Encoding"));
}
