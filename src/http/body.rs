//! Message body framing.
//!
//! [`Framing`] decides how a body is delimited; [`BodyDecoder`] then pulls
//! exactly that many bytes out of the connection's input, one chunk of
//! socket data at a time.

use bytes::{BufMut, BytesMut};

use crate::http::headers::Headers;
use crate::http::parser::{parse_header_line, LineReader, Limits, ParseError, Status};
use crate::http::request::Method;
use crate::http::response::StatusCode;

/// Longest chunk-size line accepted (hex digits plus extensions).
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all.
    Empty,
    /// Exactly this many bytes.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes. Only ever used for responses.
    UntilClose,
}

impl Framing {
    /// Framing of a request body.
    ///
    /// A request that declares both `Transfer-Encoding` and `Content-Length`
    /// is rejected rather than guessing which one the sender meant.
    pub fn for_request(headers: &Headers, limits: &Limits) -> Result<Framing, ParseError> {
        if headers.contains("Transfer-Encoding") {
            if headers.contains("Content-Length") {
                return Err(ParseError::ConflictingFraming);
            }
            return chunked_only(headers);
        }

        match content_length(headers)? {
            None | Some(0) => Ok(Framing::Empty),
            Some(n) if n > limits.max_body_size => Err(ParseError::BodyTooLarge(limits.max_body_size)),
            Some(n) => Ok(Framing::Fixed(n)),
        }
    }

    /// Framing of a response body.
    ///
    /// Without `Transfer-Encoding` or `Content-Length`, the body runs until
    /// the connection closes when `close_delimited` is set and is empty
    /// otherwise.
    pub fn for_response(
        headers: &Headers,
        status: StatusCode,
        request_method: Method,
        close_delimited: bool,
    ) -> Result<Framing, ParseError> {
        if request_method == Method::HEAD || !status.allows_body() {
            return Ok(Framing::Empty);
        }
        if headers.contains("Transfer-Encoding") {
            if headers.contains("Content-Length") {
                return Err(ParseError::ConflictingFraming);
            }
            return chunked_only(headers);
        }

        match content_length(headers)? {
            Some(0) => Ok(Framing::Empty),
            Some(n) => Ok(Framing::Fixed(n)),
            None if close_delimited => Ok(Framing::UntilClose),
            None => Ok(Framing::Empty),
        }
    }

    /// Whether the body end can be known without closing the connection.
    pub fn is_determinate(&self) -> bool {
        !matches!(self, Framing::UntilClose)
    }
}

fn chunked_only(headers: &Headers) -> Result<Framing, ParseError> {
    let codings: Vec<&str> = headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();

    match codings.as_slice() {
        [only] if only.eq_ignore_ascii_case("chunked") => Ok(Framing::Chunked),
        _ => Err(ParseError::UnsupportedTransferCoding),
    }
}

/// Parses `Content-Length`, insisting that repeated values agree.
fn content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let mut length = None;

    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength);
        }
        let n: u64 = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
        match length {
            Some(prev) if prev != n => return Err(ParseError::InvalidContentLength),
            _ => length = Some(n),
        }
    }

    Ok(length)
}

#[derive(Debug)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum DecoderState {
    Fixed(u64),
    Chunked(ChunkState),
    UntilClose,
    Done,
}

/// Incremental body decoder for one message.
#[derive(Debug)]
pub struct BodyDecoder {
    state: DecoderState,
    line: LineReader,
    trailers: Headers,
    received: u64,
    max_body_size: u64,
    max_header_line: usize,
    max_headers: usize,
}

impl BodyDecoder {
    pub fn new(framing: Framing, limits: &Limits) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Fixed(0) => DecoderState::Done,
            Framing::Fixed(n) => DecoderState::Fixed(n),
            Framing::Chunked => DecoderState::Chunked(ChunkState::Size),
            Framing::UntilClose => DecoderState::UntilClose,
        };

        Self {
            state,
            line: LineReader::default(),
            trailers: Headers::new(),
            received: 0,
            max_body_size: limits.max_body_size,
            max_header_line: limits.max_header_line,
            max_headers: limits.max_headers,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, DecoderState::Done)
    }

    /// Decodes as much of `input` as belongs to this body into `out`.
    ///
    /// Never takes more bytes than the framing allows; whatever follows the
    /// end of the body is left for the next message.
    pub fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<Status<()>, ParseError> {
        let mut pos = 0;

        loop {
            match &mut self.state {
                DecoderState::Done => return Ok(Status::Complete((), pos)),

                DecoderState::Fixed(remaining) => {
                    let take = (*remaining).min((input.len() - pos) as u64) as usize;
                    out.put_slice(&input[pos..pos + take]);
                    pos += take;
                    *remaining -= take as u64;
                    self.received += take as u64;

                    if *remaining == 0 {
                        self.state = DecoderState::Done;
                        continue;
                    }
                    return Ok(Status::Partial);
                }

                DecoderState::UntilClose => {
                    self.received += (input.len() - pos) as u64;
                    if self.received > self.max_body_size {
                        return Err(ParseError::BodyTooLarge(self.max_body_size));
                    }
                    out.put_slice(&input[pos..]);
                    return Ok(Status::Partial);
                }

                DecoderState::Chunked(ChunkState::Size) => {
                    let Some(line) =
                        self.line
                            .next_line(input, &mut pos, MAX_CHUNK_LINE, |_| ParseError::InvalidChunk)?
                    else {
                        return Ok(Status::Partial);
                    };
                    let size = parse_chunk_size(&line)?;

                    if self.received.saturating_add(size) > self.max_body_size {
                        return Err(ParseError::BodyTooLarge(self.max_body_size));
                    }
                    self.state = if size == 0 {
                        DecoderState::Chunked(ChunkState::Trailers)
                    } else {
                        DecoderState::Chunked(ChunkState::Data(size))
                    };
                }

                DecoderState::Chunked(ChunkState::Data(remaining)) => {
                    let take = (*remaining).min((input.len() - pos) as u64) as usize;
                    out.put_slice(&input[pos..pos + take]);
                    pos += take;
                    *remaining -= take as u64;
                    self.received += take as u64;

                    if *remaining > 0 {
                        return Ok(Status::Partial);
                    }
                    self.state = DecoderState::Chunked(ChunkState::DataEnd);
                }

                DecoderState::Chunked(ChunkState::DataEnd) => {
                    let Some(line) =
                        self.line
                            .next_line(input, &mut pos, MAX_CHUNK_LINE, |_| ParseError::InvalidChunk)?
                    else {
                        return Ok(Status::Partial);
                    };
                    if !line.is_empty() {
                        return Err(ParseError::InvalidChunk);
                    }
                    self.state = DecoderState::Chunked(ChunkState::Size);
                }

                DecoderState::Chunked(ChunkState::Trailers) => {
                    let Some(line) = self.line.next_line(
                        input,
                        &mut pos,
                        self.max_header_line,
                        ParseError::HeaderLineTooLong,
                    )?
                    else {
                        return Ok(Status::Partial);
                    };
                    if line.is_empty() {
                        self.state = DecoderState::Done;
                        continue;
                    }
                    parse_header_line(&line, &mut self.trailers, self.max_headers)?;
                }
            }
        }
    }

    /// Called when the peer closed the connection.
    ///
    /// Completes a close-delimited body; anything else still waiting for
    /// bytes is truncated.
    pub fn finish_at_eof(&mut self) -> Result<(), ParseError> {
        match self.state {
            DecoderState::Done => Ok(()),
            DecoderState::UntilClose => {
                self.state = DecoderState::Done;
                Ok(())
            }
            _ => Err(ParseError::Truncated),
        }
    }

    /// Trailer fields received after the last chunk.
    pub fn take_trailers(&mut self) -> Headers {
        std::mem::take(&mut self.trailers)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // Chunk extensions are ignored.
    let digits = line.split(';').next().unwrap_or_default().trim();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunk)
}

/// Frames `data` as one chunk. Empty input produces nothing, since a
/// zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    buf.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

/// Writes the last chunk, any trailers and the final CRLF.
pub fn encode_last_chunk(trailers: &Headers, buf: &mut BytesMut) {
    buf.put_slice(b"0\r\n");
    trailers.write_to(buf);
    buf.put_slice(b"\r\n");
}
