//! WebSocket upgrade and message layer.
//!
//! The connection offers requests carrying an `Upgrade` header to the
//! [`UpgradeRouter`]. When a mapping claims the path, the handshake is
//! validated; success writes `101 Switching Protocols` and hands the socket
//! to [`socket::serve`], which speaks frames until either side closes.
//! Failures are answered with 400 or 426 and the connection stays in HTTP
//! mode.
//!
//! ```text
//!  HTTP request ──▶ UpgradeRouter ──no match──▶ HandlerChain
//!                        │ match
//!                        ▼
//!                    handshake ──invalid──▶ 400/426, back to HTTP
//!                        │ ok
//!                        ▼
//!                 101 + frame loop ──▶ endpoint callbacks
//! ```

pub mod frame;
pub mod handshake;
pub mod socket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use regex::Regex;
use tokio::sync::mpsc;

use crate::http::request::Request;

pub use frame::{CloseCode, FrameError};
pub use handshake::{HandshakeError, compute_accept_key, supported_protocols};

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug)]
pub(crate) enum Outgoing {
    Message(Message),
    Close(u16, String),
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Queues messages for one upgraded connection.
#[derive(Debug, Clone)]
pub struct MessageSender {
    id: u64,
    tx: mpsc::Sender<Outgoing>,
}

impl MessageSender {
    pub(crate) fn new(tx: mpsc::Sender<Outgoing>) -> Self {
        Self {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Identifies the connection across callbacks.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a message. Returns false when the socket is gone or its
    /// queue is full.
    pub fn send_message(&self, message: Message) -> bool {
        self.tx.try_send(Outgoing::Message(message)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_message(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send_message(Message::Binary(data.into()))
    }

    /// Asks the connection to close with `code`.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx.try_send(Outgoing::Close(code, reason.into())).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receives the events of upgraded connections.
///
/// One endpoint serves every connection routed to it, so callbacks tell
/// connections apart by [`MessageSender::id`]. Callbacks run on the
/// connection's task and should not block.
pub trait WebSocketEndpoint: Send + Sync {
    /// Picks one of the subprotocols the client offered, if any.
    fn select_protocol(&self, _offered: &[String]) -> Option<String> {
        None
    }

    fn on_open(&self, _req: &Request, _sender: MessageSender) {}

    fn on_new_message(&self, sender: &MessageSender, message: Message);

    fn on_close(&self, _sender: &MessageSender) {}
}

/// Ordered path patterns mapped to endpoints.
#[derive(Default, Clone)]
pub struct UpgradeRouter {
    mappings: Vec<(Regex, Arc<dyn WebSocketEndpoint>)>,
}

impl UpgradeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a path pattern, matched against the whole path.
    pub fn map(
        &mut self,
        pattern: &str,
        endpoint: Arc<dyn WebSocketEndpoint>,
    ) -> Result<usize, regex::Error> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))?;
        self.mappings.push((pattern, endpoint));
        Ok(self.mappings.len() - 1)
    }

    /// First endpoint whose pattern matches `path`.
    pub fn route(&self, path: &str) -> Option<Arc<dyn WebSocketEndpoint>> {
        self.mappings
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map(|(_, endpoint)| Arc::clone(endpoint))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
