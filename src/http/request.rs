use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::http::headers::Headers;
use crate::uri::{self, QueryMap, Url};

/// HTTP request methods.
///
/// Represents the HTTP method/verb of a request. Anything outside this set
/// is rejected by the parser as a malformed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
    CONNECT,
    TRACE,
}

impl Method {
    /// Parses a method token. Matching is case-sensitive.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start line and header block of a request, as produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

/// Represents a parsed HTTP request from a client.
///
/// The start line, headers and body are fixed once the connection hands the
/// request to the handler chain. Handlers may only rewrite the target and
/// attach route arguments.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    route_args: Vec<String>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Version,
    headers: Headers,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: Version::Http11,
            headers: Headers::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version,
            headers: self.headers,
            body: self.body,
            remote_addr: self.remote_addr,
            route_args: Vec::new(),
        })
    }
}

impl Request {
    /// Assembles a request from a parsed head and its decoded body.
    pub fn from_parts(head: RequestHead, body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: head.method,
            target: head.target,
            version: head.version,
            headers: head.headers,
            body,
            remote_addr,
            route_args: Vec::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request target, exactly as it appeared on the start line
    /// (or as last rewritten).
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Retrieves the first value of a header, ignoring name case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Splits the target into its generic URL components.
    pub fn url(&self) -> Url {
        Url::split(&self.target)
    }

    /// Path component of the target.
    pub fn path(&self) -> String {
        self.url().path
    }

    /// Decoded query string of the target.
    pub fn query(&self) -> QueryMap {
        uri::parse_query(self.url().query.as_bytes())
    }

    /// Capture groups recorded by the router that matched this request.
    pub fn route_args(&self) -> &[String] {
        &self.route_args
    }

    /// Replaces the request target; later handlers see the new value.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn set_route_args(&mut self, args: Vec<String>) {
        self.route_args = args;
    }

    /// Retrieves the Content-Length header value and parses it.
    ///
    /// Returns `None` if the header is missing or not a valid number.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// Determines whether the client expects the connection to stay open.
    ///
    /// HTTP/1.1 is persistent unless the client sent `Connection: close`;
    /// HTTP/1.0 only when it asked for `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        wants_keep_alive(self.version, &self.headers)
    }

    /// Whether the request asks to switch protocols.
    pub fn is_upgrade(&self) -> bool {
        self.headers.contains("Upgrade") && self.headers.has_token("Connection", "upgrade")
    }
}

pub(crate) fn wants_keep_alive(version: Version, headers: &Headers) -> bool {
    match version {
        Version::Http11 => !headers.has_token("Connection", "close"),
        Version::Http10 => headers.has_token("Connection", "keep-alive"),
    }
}
