//! Opening handshake (RFC 6455 section 4.2).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};
use crate::http::response::StatusCode;
use crate::http::writer::{plain_response, serialize_head};

/// Concatenated with the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken.
pub const WS_VERSION: &str = "13";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("upgrade requires a GET request")]
    MethodNotGet,
    #[error("upgrade requires HTTP/1.1")]
    HttpVersion,
    #[error("missing or invalid Upgrade header")]
    MissingUpgrade,
    #[error("Connection header lacks the upgrade token")]
    MissingConnectionUpgrade,
    #[error("unsupported Sec-WebSocket-Version")]
    UnsupportedVersion,
    #[error("missing or malformed Sec-WebSocket-Key")]
    InvalidKey,
}

impl HandshakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::UnsupportedVersion => StatusCode::UpgradeRequired,
            _ => StatusCode::BadRequest,
        }
    }

    /// Complete error response. The connection stays in HTTP mode, so the
    /// reply is length-delimited and keeps the connection open when the
    /// client allows it.
    pub fn to_response(&self, keep_alive: bool) -> Bytes {
        let mut extra = Headers::new();
        if *self == HandshakeError::UnsupportedVersion {
            extra.append("Sec-WebSocket-Version", WS_VERSION);
        }
        plain_response(self.status(), &self.to_string(), !keep_alive, &extra)
    }
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub accept_key: String,
    pub offered_protocols: Vec<String>,
}

/// `Sec-WebSocket-Accept` for a client key: base64(SHA-1(key + GUID)).
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Checks an upgrade request, reporting the first failed requirement.
pub fn validate(req: &Request) -> Result<Handshake, HandshakeError> {
    if req.method() != Method::GET {
        return Err(HandshakeError::MethodNotGet);
    }
    if req.version() != Version::Http11 {
        return Err(HandshakeError::HttpVersion);
    }

    let headers = req.headers();
    if !headers.has_token("Upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !headers.has_token("Connection", "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }
    if headers.get("Sec-WebSocket-Version").map(str::trim) != Some(WS_VERSION) {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let key = headers
        .get("Sec-WebSocket-Key")
        .map(str::trim)
        .ok_or(HandshakeError::InvalidKey)?;
    match BASE64.decode(key) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    Ok(Handshake {
        accept_key: compute_accept_key(key),
        offered_protocols: supported_protocols(headers),
    })
}

/// Subprotocols offered by the client, across every
/// `Sec-WebSocket-Protocol` field, in order.
pub fn supported_protocols(headers: &Headers) -> Vec<String> {
    headers
        .get_all("Sec-WebSocket-Protocol")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// The `101 Switching Protocols` response completing the handshake.
pub fn switching_protocols(accept_key: &str, protocol: Option<&str>) -> Bytes {
    let mut headers = Headers::new();
    headers.append("Upgrade", "websocket");
    headers.append("Connection", "Upgrade");
    headers.append("Sec-WebSocket-Accept", accept_key);
    if let Some(protocol) = protocol {
        headers.append("Sec-WebSocket-Protocol", protocol);
    }

    let mut buf = BytesMut::new();
    serialize_head(Version::Http11, StatusCode::SwitchingProtocols, &headers, &mut buf);
    buf.freeze()
}
