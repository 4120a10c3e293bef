//! Incremental request-head parser.
//!
//! [`HeadParser`] is fed whatever the socket delivered, one chunk at a time,
//! and keeps partial lines between calls: splitting a request at any byte
//! boundary yields the same [`RequestHead`] as feeding it whole.

use bytes::BytesMut;

use crate::config::ServerConfig;
use crate::http::body::{BodyDecoder, Framing};
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, RequestHead, Version};
use crate::http::response::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown request method")]
    InvalidMethod,
    #[error("malformed header field")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("request line longer than {0} bytes")]
    StartLineTooLong(usize),
    #[error("header line longer than {0} bytes")]
    HeaderLineTooLong(usize),
    #[error("more than {0} header fields")]
    TooManyHeaders(usize),
    #[error("both Transfer-Encoding and Content-Length present")]
    ConflictingFraming,
    #[error("unsupported transfer coding")]
    UnsupportedTransferCoding,
    #[error("malformed chunk")]
    InvalidChunk,
    #[error("body larger than {0} bytes")]
    BodyTooLarge(u64),
    #[error("connection closed before the message was complete")]
    Truncated,
    #[error("incomplete message")]
    Incomplete,
}

impl ParseError {
    /// Status of the best-effort error response sent before closing.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            ParseError::StartLineTooLong(_) => StatusCode::UriTooLong,
            ParseError::HeaderLineTooLong(_) | ParseError::TooManyHeaders(_) => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
            ParseError::BodyTooLarge(_) => StatusCode::PayloadTooLarge,
            ParseError::UnsupportedTransferCoding => StatusCode::NotImplemented,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Size limits protecting the parser from unbounded buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_start_line: usize,
    pub max_header_line: usize,
    pub max_headers: usize,
    pub max_body_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_start_line: 8192,
            max_header_line: 8192,
            max_headers: 100,
            max_body_size: 16 * 1024 * 1024,
        }
    }
}

impl From<&ServerConfig> for Limits {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            max_start_line: cfg.max_start_line,
            max_header_line: cfg.max_header_line,
            max_headers: cfg.max_headers,
            max_body_size: cfg.max_body_size,
        }
    }
}

/// Outcome of feeding bytes to an incremental decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum Status<T> {
    /// Everything offered was consumed; more input is needed.
    Partial,
    /// Done; the `usize` counts bytes consumed from the last input, the rest
    /// belongs to whatever follows.
    Complete(T, usize),
}

/// Accumulates one line across arbitrary input splits.
///
/// Lines end in LF; a preceding CR is stripped. A CR anywhere else in the
/// line is rejected.
#[derive(Debug, Default)]
pub(crate) struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    /// Returns the next complete line, or `None` once `input[*pos..]` is used
    /// up. `too_long` builds the error for a line exceeding `limit`.
    pub(crate) fn next_line(
        &mut self,
        input: &[u8],
        pos: &mut usize,
        limit: usize,
        too_long: fn(usize) -> ParseError,
    ) -> Result<Option<Vec<u8>>, ParseError> {
        let rest = &input[*pos..];

        match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                if self.content_len(&rest[..idx]) > limit {
                    return Err(too_long(limit));
                }
                self.buf.extend_from_slice(&rest[..idx]);
                *pos += idx + 1;

                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.contains(&b'\r') {
                    return Err(ParseError::InvalidHeader);
                }
                Ok(Some(line))
            }
            None => {
                // A trailing CR may still turn out to be half of the CRLF.
                if self.content_len(rest) > limit {
                    return Err(too_long(limit));
                }
                self.buf.extend_from_slice(rest);
                *pos = input.len();
                Ok(None)
            }
        }
    }

    /// Length of the buffered line plus `more`, not counting a final CR.
    fn content_len(&self, more: &[u8]) -> usize {
        let total = self.buf.len() + more.len();
        let last = more.last().or(self.buf.last());
        if last == Some(&b'\r') { total - 1 } else { total }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Parses one `name: value` line into `headers`.
pub(crate) fn parse_header_line(
    line: &[u8],
    headers: &mut Headers,
    max_headers: usize,
) -> Result<(), ParseError> {
    // Obsolete line folding is not supported.
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(ParseError::InvalidHeader);
    }

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::InvalidHeader)?;
    let name = &line[..colon];

    if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
        return Err(ParseError::InvalidHeader);
    }
    if headers.len() >= max_headers {
        return Err(ParseError::TooManyHeaders(max_headers));
    }

    let value = trim_ows(&line[colon + 1..]);
    if value.iter().any(|&b| is_forbidden_in_value(b)) {
        return Err(ParseError::InvalidHeader);
    }
    let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidHeader)?;
    let value = std::str::from_utf8(value).map_err(|_| ParseError::InvalidHeader)?;
    headers.append(name, value);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    StartLine,
    Headers,
}

/// Incremental parser for a request line plus header block.
#[derive(Debug)]
pub struct HeadParser {
    limits: Limits,
    state: HeadState,
    line: LineReader,
    start: Option<(Method, String, Version)>,
    headers: Headers,
}

impl HeadParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            state: HeadState::StartLine,
            line: LineReader::default(),
            start: None,
            headers: Headers::new(),
        }
    }

    /// True once some bytes of a request have been seen.
    pub fn in_progress(&self) -> bool {
        self.state != HeadState::StartLine || !self.line.is_empty()
    }

    /// Feeds newly arrived bytes.
    ///
    /// On completion the parser resets itself, ready for the next request on
    /// the same connection.
    pub fn feed(&mut self, input: &[u8]) -> Result<Status<RequestHead>, ParseError> {
        let mut pos = 0;

        loop {
            let (limit, too_long): (usize, fn(usize) -> ParseError) = match self.state {
                HeadState::StartLine => (self.limits.max_start_line, ParseError::StartLineTooLong),
                HeadState::Headers => (self.limits.max_header_line, ParseError::HeaderLineTooLong),
            };

            let Some(line) = self.line.next_line(input, &mut pos, limit, too_long)? else {
                return Ok(Status::Partial);
            };

            match self.state {
                HeadState::StartLine => {
                    // Stray empty lines ahead of a request are tolerated.
                    if line.is_empty() {
                        continue;
                    }
                    self.start = Some(parse_start_line(&line)?);
                    self.state = HeadState::Headers;
                }
                HeadState::Headers => {
                    if line.is_empty() {
                        let (method, target, version) =
                            self.start.take().ok_or(ParseError::InvalidRequest)?;
                        let headers = std::mem::take(&mut self.headers);
                        self.state = HeadState::StartLine;

                        let head = RequestHead {
                            method,
                            target,
                            version,
                            headers,
                        };
                        return Ok(Status::Complete(head, pos));
                    }
                    parse_header_line(&line, &mut self.headers, self.limits.max_headers)?;
                }
            }
        }
    }
}

fn parse_start_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequest)?;
    let mut parts = line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || target.is_empty() || target.contains('\t') {
        return Err(ParseError::InvalidRequest);
    }

    let version = parse_version(version)?;
    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    Ok((method, target.to_string(), version))
}

fn parse_version(s: &str) -> Result<Version, ParseError> {
    match s {
        "HTTP/1.1" => Ok(Version::Http11),
        "HTTP/1.0" => Ok(Version::Http10),
        _ => {
            let digits = s.strip_prefix("HTTP/").ok_or(ParseError::InvalidRequest)?;
            let bytes = digits.as_bytes();
            if bytes.len() == 3 && bytes[0].is_ascii_digit() && bytes[1] == b'.' && bytes[2].is_ascii_digit() {
                Err(ParseError::UnsupportedVersion)
            } else {
                Err(ParseError::InvalidRequest)
            }
        }
    }
}

pub(crate) fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Control bytes other than HTAB never appear in a field value.
pub(crate) fn is_forbidden_in_value(b: u8) -> bool {
    (b < 0x20 && b != b'\t') || b == 0x7f
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// Parses a complete request (head and body) from one buffer.
///
/// Returns the request and the number of bytes it occupied, or
/// [`ParseError::Incomplete`] when `buf` stops short.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let limits = Limits::default();
    let mut parser = HeadParser::new(limits);

    let (head, head_len) = match parser.feed(buf)? {
        Status::Complete(head, consumed) => (head, consumed),
        Status::Partial => return Err(ParseError::Incomplete),
    };

    let framing = Framing::for_request(&head.headers, &limits)?;
    let mut decoder = BodyDecoder::new(framing, &limits);
    let mut body = BytesMut::new();

    match decoder.decode(&buf[head_len..], &mut body)? {
        Status::Complete((), consumed) => {
            let mut head = head;
            head.headers.merge(decoder.take_trailers());
            Ok((Request::from_parts(head, body.freeze(), None), head_len + consumed))
        }
        Status::Partial => Err(ParseError::Incomplete),
    }
}
