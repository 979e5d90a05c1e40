//! HTTP/1.x compatibility mode (spec.md §4.1 "HTTP/1 path").
//!
//! `httparse` is the oracle spec.md §9 asks for: any parser that returns
//! `(consumed, needs_more, error)` and exposes raw header byte ranges
//! suffices, and `httparse` is exactly that shape.

use crate::error::{Error, Result};
use crate::hpack::Header;
use crate::limits::MAX_HEADERS;

/// What the connection should do after parsing one HTTP/1 message's
/// start-line and headers.
#[derive(Debug)]
pub struct ParsedMessage {
    /// Pseudo- and regular headers, already synthesized/rewritten.
    pub headers: Vec<Header>,
    pub body_mode: BodyMode,
    /// Present when the client asked to upgrade and we (the server)
    /// recognized and accepted the protocol token.
    pub upgrade: Option<Upgrade>,
    /// Bytes of the input consumed by the start-line + headers.
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    ContentLength(u64),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upgrade {
    H2c,
    Other,
}

/// Parse one HTTP/1 request, as seen by a server.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<ParsedMessage>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    let status = req
        .parse(buf)
        .map_err(|e| Error::protocol_error(format!("malformed HTTP/1 request: {e}")))?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.unwrap_or("GET").to_string();
    let path = req.path.unwrap_or("/").to_string();

    let mut headers = vec![
        Header::new(b":method".to_vec(), method.into_bytes()),
        Header::new(b":path".to_vec(), path.into_bytes()),
        Header::new(b":scheme".to_vec(), b"unknown".to_vec()),
    ];
    let RewrittenHeaders { content_length, chunked, upgrade, extra } = rewrite_headers(req.headers)?;
    headers.extend(extra);

    let body_mode = resolve_body_mode(content_length, chunked)?;

    Ok(Some(ParsedMessage { headers, body_mode, upgrade, consumed }))
}

/// Parse one HTTP/1 response, as seen by a client. `request_method`
/// decides bodyless status handling (HEAD responses never have a body
/// regardless of headers, mirrored in the caller).
pub fn parse_response(buf: &[u8]) -> Result<Option<(u16, Vec<Header>, BodyMode, usize)>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut raw_headers);
    let status = resp
        .parse(buf)
        .map_err(|e| Error::protocol_error(format!("malformed HTTP/1 response: {e}")))?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };
    let code = resp.code.unwrap_or(200);

    let mut headers = vec![Header::new(b":status".to_vec(), code.to_string().into_bytes())];
    let RewrittenHeaders { content_length, chunked, upgrade: _, extra } = rewrite_headers(resp.headers)?;
    headers.extend(extra);

    // spec.md §4.1: 1xx (except 101), 204, 304 never carry a body.
    let body_mode = if matches!(code, 204 | 304) || (100..200).contains(&code) && code != 101 {
        BodyMode::None
    } else {
        resolve_body_mode(content_length, chunked)?
    };

    Ok(Some((code, headers, body_mode, consumed)))
}

struct RewrittenHeaders {
    content_length: Option<u64>,
    chunked: bool,
    upgrade: Option<Upgrade>,
    extra: Vec<Header>,
}

/// Lowercase every header name, rewrite `host` → `:authority`, and pick
/// out the transfer-framing and upgrade signals (spec.md §4.1).
fn rewrite_headers(raw: &[httparse::Header]) -> Result<RewrittenHeaders> {
    let mut content_length = None;
    let mut chunked = false;
    let mut upgrade = None;
    let mut extra = Vec::with_capacity(raw.len());

    for h in raw {
        let name = h.name.to_ascii_lowercase();
        match name.as_str() {
            "host" => extra.push(Header::new(b":authority".to_vec(), h.value.to_vec())),
            "content-length" => {
                let text = std::str::from_utf8(h.value)
                    .map_err(|_| Error::protocol_error("content-length is not valid UTF-8"))?;
                let value: u64 = text
                    .trim()
                    .parse()
                    .map_err(|_| Error::protocol_error("content-length is not a valid integer"))?;
                content_length = Some(value);
                extra.push(Header::new(name.into_bytes(), h.value.to_vec()));
            }
            "transfer-encoding" => {
                let text = String::from_utf8_lossy(h.value).to_ascii_lowercase();
                // Only the final comma-separated token governs framing.
                if let Some(last) = text.rsplit(',').next() {
                    if last.trim() == "chunked" {
                        chunked = true;
                    }
                }
                extra.push(Header::new(name.into_bytes(), h.value.to_vec()));
            }
            "upgrade" => {
                let text = String::from_utf8_lossy(h.value).to_ascii_lowercase();
                upgrade = Some(if text.split(',').any(|t| t.trim() == "h2c") {
                    Upgrade::H2c
                } else {
                    Upgrade::Other
                });
                extra.push(Header::new(name.into_bytes(), h.value.to_vec()));
            }
            _ => extra.push(Header::new(name.into_bytes(), h.value.to_vec())),
        }
    }

    if chunked && content_length.is_some() {
        return Err(Error::protocol_error("content-length and chunked transfer-encoding are exclusive"));
    }

    Ok(RewrittenHeaders { content_length, chunked, upgrade, extra })
}

fn resolve_body_mode(content_length: Option<u64>, chunked: bool) -> Result<BodyMode> {
    Ok(if chunked {
        BodyMode::Chunked
    } else if let Some(len) = content_length {
        BodyMode::ContentLength(len)
    } else {
        BodyMode::None
    })
}

/// One step of chunked-transfer decoding: given the bytes available
/// after a chunk boundary, return the chunk's data range and how many
/// input bytes it consumed (size line + data + trailing CRLF), or
/// `Ok(None)` if more bytes are needed. A zero-length chunk signals the
/// end of the message; its trailing CRLF is included in `consumed` and
/// `data` is empty.
pub fn decode_chunk(buf: &[u8]) -> Result<Option<(std::ops::Range<usize>, usize, bool)>> {
    let line_end = match buf.windows(2).position(|w| w == b"\r\n") {
        Some(i) => i,
        None => return Ok(None),
    };
    let size_line = std::str::from_utf8(&buf[..line_end])
        .map_err(|_| Error::protocol_error("chunk size line is not valid UTF-8"))?;
    // Strip chunk extensions (";...") per RFC 7230 §4.1.1.
    let size_text = size_line.split(';').next().unwrap_or("");
    let size = usize::from_str_radix(size_text.trim(), 16)
        .map_err(|_| Error::protocol_error("malformed chunk size"))?;

    let data_start = line_end + 2;
    let data_end = data_start + size;
    if buf.len() < data_end + 2 {
        return Ok(None);
    }
    if &buf[data_end..data_end + 2] != b"\r\n" {
        return Err(Error::protocol_error("chunk data missing trailing CRLF"));
    }
    let is_last = size == 0;
    Ok(Some((data_start..data_end, data_end + 2, is_last)))
}

/// Encode one chunk (or, for `data.is_empty()`, the terminating
/// zero-chunk) in chunked transfer-encoding.
pub fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}
