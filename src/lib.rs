//! Wicket - embeddable HTTP/1.x and WebSocket server engine
//!
//! Core library: protocol engine, handler dispatch, sessions and the
//! WebSocket upgrade path.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod server;
pub mod session;
pub mod uri;
pub mod websocket;
