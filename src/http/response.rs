use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::http::body::{encode_chunk, encode_last_chunk};
use crate::http::headers::{self, Headers};
use crate::http::request::{Method, Version};
use crate::http::writer::serialize_head;
use crate::session::Session;

/// HTTP status codes used by the server.
///
/// Codes without a dedicated variant travel as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 101 Switching Protocols
    SwitchingProtocols,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 206 Partial Content
    PartialContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Found
    Found,
    /// 303 See Other
    SeeOther,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 408 Request Timeout
    RequestTimeout,
    /// 412 Precondition Failed
    PreconditionFailed,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 414 URI Too Long
    UriTooLong,
    /// 416 Range Not Satisfiable
    RangeNotSatisfiable,
    /// 426 Upgrade Required
    UpgradeRequired,
    /// 431 Request Header Fields Too Large
    RequestHeaderFieldsTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 505 HTTP Version Not Supported
    HttpVersionNotSupported,
    /// Any other three-digit code
    Other(u16),
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::PartialContent => 206,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::SeeOther => 303,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::PreconditionFailed => 412,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::UriTooLong => 414,
            StatusCode::RangeNotSatisfiable => 416,
            StatusCode::UpgradeRequired => 426,
            StatusCode::RequestHeaderFieldsTooLarge => 431,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::HttpVersionNotSupported => 505,
            StatusCode::Other(code) => *code,
        }
    }

    /// Maps a numeric code onto the matching variant.
    pub fn from_u16(code: u16) -> Self {
        match code {
            100 => StatusCode::Continue,
            101 => StatusCode::SwitchingProtocols,
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            206 => StatusCode::PartialContent,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::Found,
            303 => StatusCode::SeeOther,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            408 => StatusCode::RequestTimeout,
            412 => StatusCode::PreconditionFailed,
            413 => StatusCode::PayloadTooLarge,
            414 => StatusCode::UriTooLong,
            416 => StatusCode::RangeNotSatisfiable,
            426 => StatusCode::UpgradeRequired,
            431 => StatusCode::RequestHeaderFieldsTooLarge,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            505 => StatusCode::HttpVersionNotSupported,
            other => StatusCode::Other(other),
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.as_u16() {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            426 => "Upgrade Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Informational, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        let code = self.as_u16();
        !(code < 200 || code == 204 || code == 304)
    }
}

/// Contract violations on the response state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("response headers were already sent")]
    HeadersAlreadySent,
    #[error("body written before the response head")]
    HeadNotWritten,
    #[error("response already finished")]
    Finished,
    #[error("status {0} does not allow a body")]
    BodyNotAllowed(u16),
    #[error("body exceeds the declared Content-Length of {0}")]
    BodyOverflow(u64),
    #[error("body ended {0} bytes short of the declared Content-Length")]
    BodyIncomplete(u64),
    #[error("invalid Content-Length header")]
    InvalidContentLength,
    #[error("invalid header field {0:?}")]
    InvalidHeader(String),
    #[error("trailers require a chunked body")]
    TrailersNotAllowed,
    #[error("connection closed")]
    ConnectionClosed,
}

/// Progress of a response through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    NotStarted,
    HeadersSent,
    BodyStreaming,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    /// No body bytes may follow the head.
    None,
    /// HEAD request: the head describes a body that is never sent.
    Suppressed,
    Fixed { remaining: u64, declared: u64 },
    Chunked,
    /// HTTP/1.0 keep-alive: the body is collected and the head, with its
    /// Content-Length, goes out at `end`.
    Buffered,
    /// HTTP/1.0 without keep-alive: the body ends when the connection does.
    UntilClose,
}

/// An HTTP response under construction.
///
/// Handlers set the status and headers, commit them with
/// [`write_head`](Response::write_head), stream the body with
/// [`write`](Response::write) and close it with [`end`](Response::end).
/// Out-of-order calls fail with a [`ResponseError`].
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    trailers: Headers,
    state: ResponseState,
    version: Version,
    method: Method,
    keep_alive: bool,
    mode: BodyMode,
    out: BytesMut,
    deferred: BytesMut,
    sink: Option<mpsc::Sender<Bytes>>,
    committed: bool,
    sessions: Vec<Session>,
}

impl Response {
    /// Creates a response to a request with the given version and method.
    ///
    /// `keep_alive` is what the request asked for; the response may still
    /// downgrade it.
    pub fn new(version: Version, method: Method, keep_alive: bool) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            trailers: Headers::new(),
            state: ResponseState::NotStarted,
            version,
            method,
            keep_alive,
            mode: BodyMode::None,
            out: BytesMut::new(),
            deferred: BytesMut::new(),
            sink: None,
            committed: false,
            sessions: Vec::new(),
        }
    }

    /// Routes flushed output to the connection that owns this response.
    pub(crate) fn with_sink(mut self, sink: mpsc::Sender<Bytes>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers, available until the head is written.
    pub fn headers_mut(&mut self) -> Result<&mut Headers, ResponseError> {
        self.ensure_not_started()?;
        Ok(&mut self.headers)
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.ensure_not_started()?;
        self.status = status;
        Ok(())
    }

    /// Sets a header, replacing earlier values.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ResponseError> {
        let value = value.into();
        check_field(name, &value)?;
        self.headers_mut()?.insert(name, value);
        Ok(())
    }

    /// Adds a header next to earlier values.
    pub fn append_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ResponseError> {
        let value = value.into();
        check_field(name, &value)?;
        self.headers_mut()?.append(name, value);
        Ok(())
    }

    /// Commits the status line and headers.
    ///
    /// Picks the body framing: an explicit `Content-Length` is honoured,
    /// otherwise HTTP/1.1 peers get a chunked body and HTTP/1.0 peers a
    /// buffered one (keep-alive) or a close-delimited one.
    pub fn write_head(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.ensure_not_started()?;
        // Fields set through `headers_mut` skipped the setter checks.
        if let Some(name) = self.headers.find_invalid() {
            return Err(ResponseError::InvalidHeader(name.to_string()));
        }
        self.status = status;

        if self.headers.has_token("Connection", "close") {
            self.keep_alive = false;
        }

        self.mode = if !status.allows_body() {
            self.headers.remove("Transfer-Encoding");
            if status != StatusCode::NotModified {
                self.headers.remove("Content-Length");
            }
            BodyMode::None
        } else if let Some(value) = self.headers.get("Content-Length") {
            let declared = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ResponseError::InvalidContentLength)?;
            self.headers.remove("Transfer-Encoding");
            if self.method == Method::HEAD {
                BodyMode::Suppressed
            } else {
                BodyMode::Fixed {
                    remaining: declared,
                    declared,
                }
            }
        } else if self.version == Version::Http11 {
            self.headers.insert("Transfer-Encoding", "chunked");
            if self.method == Method::HEAD {
                BodyMode::Suppressed
            } else {
                BodyMode::Chunked
            }
        } else if self.method == Method::HEAD {
            BodyMode::Suppressed
        } else if self.keep_alive {
            BodyMode::Buffered
        } else {
            BodyMode::UntilClose
        };

        if matches!(self.mode, BodyMode::UntilClose) {
            self.keep_alive = false;
        }
        if self.status != StatusCode::SwitchingProtocols {
            let connection = if self.keep_alive { "keep-alive" } else { "close" };
            self.headers.insert("Connection", connection);
        }

        self.state = ResponseState::HeadersSent;
        if self.mode != BodyMode::Buffered {
            self.serialize_head();
        }
        Ok(())
    }

    /// Appends body bytes according to the framing chosen by `write_head`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        match self.state {
            ResponseState::NotStarted => return Err(ResponseError::HeadNotWritten),
            ResponseState::Finished => return Err(ResponseError::Finished),
            ResponseState::HeadersSent | ResponseState::BodyStreaming => {}
        }
        if data.is_empty() {
            return Ok(());
        }

        match &mut self.mode {
            BodyMode::None => return Err(ResponseError::BodyNotAllowed(self.status.as_u16())),
            BodyMode::Suppressed => {}
            BodyMode::Fixed { remaining, declared } => {
                if data.len() as u64 > *remaining {
                    return Err(ResponseError::BodyOverflow(*declared));
                }
                *remaining -= data.len() as u64;
                self.out.put_slice(data);
            }
            BodyMode::Chunked => encode_chunk(data, &mut self.out),
            BodyMode::Buffered => self.deferred.put_slice(data),
            BodyMode::UntilClose => self.out.put_slice(data),
        }

        self.state = ResponseState::BodyStreaming;
        Ok(())
    }

    /// Queues a trailer field, sent after the last chunk.
    pub fn add_trailer(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), ResponseError> {
        match self.state {
            ResponseState::NotStarted => return Err(ResponseError::HeadNotWritten),
            ResponseState::Finished => return Err(ResponseError::Finished),
            _ => {}
        }
        if self.mode != BodyMode::Chunked {
            return Err(ResponseError::TrailersNotAllowed);
        }
        let name = name.into();
        let value = value.into();
        check_field(&name, &value)?;
        self.trailers.append(name, value);
        Ok(())
    }

    /// Writes any final bytes and terminates the body.
    pub fn end(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        self.write(data)?;

        match self.mode {
            BodyMode::Fixed { remaining, .. } if remaining > 0 => {
                // The peer would wait for bytes that never come.
                self.keep_alive = false;
                self.state = ResponseState::Finished;
                return Err(ResponseError::BodyIncomplete(remaining));
            }
            BodyMode::Chunked => {
                let trailers = std::mem::take(&mut self.trailers);
                encode_last_chunk(&trailers, &mut self.out);
            }
            BodyMode::Buffered => {
                self.headers
                    .insert("Content-Length", self.deferred.len().to_string());
                self.serialize_head();
                let body = self.deferred.split();
                self.out.unsplit(body);
            }
            _ => {}
        }

        self.state = ResponseState::Finished;
        Ok(())
    }

    /// Sends a complete response with a fixed-length body in one go.
    pub fn send(&mut self, status: StatusCode, body: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        let body = body.as_ref();
        if status.allows_body() {
            self.set_header("Content-Length", body.len().to_string())?;
        }
        self.write_head(status)?;
        if status.allows_body() {
            self.end(body)
        } else {
            self.end(&[])
        }
    }

    /// Hands everything produced so far to the connection, waiting while
    /// its queue is full.
    pub async fn flush(&mut self) -> Result<(), ResponseError> {
        if self.out.is_empty() {
            return Ok(());
        }
        let Some(sink) = &self.sink else {
            return Ok(());
        };

        let chunk = self.out.split().freeze();
        self.committed = true;
        sink.send(chunk)
            .await
            .map_err(|_| ResponseError::ConnectionClosed)
    }

    /// True once bytes of this response may have reached the peer.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the connection may carry another request after this
    /// response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && self.state == ResponseState::Finished
    }

    /// Forces `Connection: close` on a response that has not started.
    pub(crate) fn disable_keep_alive(&mut self) {
        self.keep_alive = false;
    }

    /// Drains serialized bytes not yet handed to the connection.
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// Completes a response its handler left open.
    pub(crate) fn finish(&mut self) -> Result<(), ResponseError> {
        match self.state {
            ResponseState::NotStarted => self.send(self.status, b""),
            ResponseState::HeadersSent | ResponseState::BodyStreaming => self.end(&[]),
            ResponseState::Finished => Ok(()),
        }
    }

    /// Replaces whatever was produced with an error response, unless bytes
    /// already left for the peer. Returns whether the swap happened.
    pub(crate) fn replace_with_error(&mut self, status: StatusCode, body: &str) -> bool {
        if self.committed {
            return false;
        }

        let cookies: Vec<String> = self
            .headers
            .get_all("Set-Cookie")
            .filter(|v| headers::is_valid_value(v))
            .map(str::to_string)
            .collect();
        self.headers.clear();
        for cookie in cookies {
            self.headers.append("Set-Cookie", cookie);
        }
        self.trailers.clear();
        self.out.clear();
        self.deferred.clear();
        self.state = ResponseState::NotStarted;
        self.mode = BodyMode::None;

        let _ = self.set_header("Content-Type", "text/plain");
        self.send(status, body).is_ok()
    }

    /// Sessions opened while serving this request.
    pub(crate) fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub(crate) fn attach_session(&mut self, session: Session) {
        self.sessions.push(session);
    }

    fn ensure_not_started(&self) -> Result<(), ResponseError> {
        if self.state != ResponseState::NotStarted {
            return Err(ResponseError::HeadersAlreadySent);
        }
        Ok(())
    }

    fn serialize_head(&mut self) {
        for session in &self.sessions {
            if let Some(cookie) = session.take_cookie_directive() {
                self.headers.append("Set-Cookie", cookie);
            }
        }
        let mut head = BytesMut::new();
        serialize_head(self.version, self.status, &self.headers, &mut head);
        head.unsplit(self.out.split());
        self.out = head;
    }
}

fn check_field(name: &str, value: &str) -> Result<(), ResponseError> {
    if headers::is_valid_name(name) && headers::is_valid_value(value) {
        Ok(())
    } else {
        Err(ResponseError::InvalidHeader(name.to_string()))
    }
}
