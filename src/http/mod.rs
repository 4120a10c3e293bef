//! HTTP/1.x protocol engine.
//!
//! - **`parser`**: incremental request-line and header parser
//! - **`body`**: body framing, chunked decoding and encoding
//! - **`headers`**: ordered, case-insensitive header multimap
//! - **`request`** / **`response`**: the exchange handed to handlers
//! - **`writer`**: status-line serialization and socket writes
//! - **`connection`**: the per-connection state machine
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← buffered pipelined bytes are parsed first
//!        └────────┬─────────┘
//!                 │ first byte
//!                 ▼
//!        ┌──────────────────┐
//!        │  ReadingHeaders  │ ── malformed ──┐
//!        └────────┬─────────┘                │
//!                 │ blank line               │
//!                 ▼                          │
//!        ┌──────────────────┐                │
//!        │   ReadingBody    │ ── malformed ──┤ best-effort 4xx
//!        └────────┬─────────┘                │
//!                 │ framing satisfied        │
//!                 ▼                          │
//!        ┌──────────────────┐                │
//!        │   Dispatching    │                │
//!        └────────┬─────────┘                │
//!                 │ handler verdict          │
//!                 ▼                          │
//!        ┌──────────────────┐                │
//!        │ WritingResponse  │                │
//!        └────────┬─────────┘                │
//!                 ├─ keep-alive → AwaitingRequest
//!                 └─ close ──────────────────┴──▶ Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wicket::config::ServerConfig;
//! use wicket::dispatch::{HandlerChain, NotFound};
//! use wicket::http::connection::{Connection, ServerContext};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut chain = HandlerChain::new();
//!     chain.push(NotFound);
//!     let ctx = Arc::new(ServerContext::new(&ServerConfig::default(), chain));
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (socket, addr) = listener.accept().await?;
//!         let (ctx, shutdown) = (ctx.clone(), shutdown.clone());
//!         tokio::spawn(async move {
//!             let mut conn = Connection::new(socket, Some(addr), ctx, shutdown);
//!             if let Err(e) = conn.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```

pub mod body;
pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
