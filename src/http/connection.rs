use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::config::ServerConfig;
use crate::dispatch::{HandlerChain, NotFound, Outcome};
use crate::http::body::{BodyDecoder, Framing};
use crate::http::headers::Headers;
use crate::http::parser::{HeadParser, Limits, ParseError, Status};
use crate::http::request::{Request, RequestHead, Version};
use crate::http::response::{Response, ResponseState, StatusCode};
use crate::http::writer::{plain_response, ResponseWriter, CONTINUE};
use crate::server::shutdown_signal;
use crate::websocket::handshake::{self, Handshake};
use crate::websocket::{socket, UpgradeRouter, WebSocketEndpoint};

/// Chunks a handler may queue before `Response::flush` waits.
const RESPONSE_QUEUE: usize = 16;
const READ_CHUNK: usize = 4096;
/// Pipelined bytes buffered while a handler runs; past this the socket is
/// left alone until the next request is read.
const READ_AHEAD_LIMIT: usize = 64 * 1024;

/// Everything connections share: handlers, upgrade routes and limits.
pub struct ServerContext {
    chain: HandlerChain,
    upgrades: UpgradeRouter,
    limits: Limits,
    idle_timeout: Option<Duration>,
    max_ws_payload: u64,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, chain: HandlerChain) -> Self {
        Self {
            chain,
            upgrades: UpgradeRouter::new(),
            limits: Limits::from(config),
            idle_timeout: config.idle_timeout(),
            max_ws_payload: config.max_ws_payload,
        }
    }

    pub fn with_upgrades(mut self, upgrades: UpgradeRouter) -> Self {
        self.upgrades = upgrades;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    Closed,
}

/// An upgrade request that passed the handshake checks.
struct Upgrade {
    req: Request,
    handshake: Handshake,
    endpoint: Arc<dyn WebSocketEndpoint>,
}

enum Fill {
    Data,
    Eof,
    TimedOut,
}

/// Serves the requests of one accepted stream, strictly one at a time.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    // Bytes read but not yet consumed; holds pipelined requests.
    buffer: BytesMut,
    state: ConnectionState,
    ctx: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        ctx: Arc<ServerContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            state: ConnectionState::AwaitingRequest,
            ctx,
            shutdown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs until the peer leaves, the protocol requires a close, or the
    /// server shuts down. Shutdown abandons whatever HTTP exchange is in
    /// flight; an upgraded socket closes itself with 1001.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut shutdown = self.shutdown.clone();

        let served = tokio::select! {
            res = self.serve() => res,
            _ = shutdown_signal(&mut shutdown) => {
                tracing::debug!(peer = ?self.peer, "connection aborted by shutdown");
                Ok(None)
            }
        };

        let result = match served {
            Ok(Some(upgrade)) => self.upgrade(upgrade).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        self.state = ConnectionState::Closed;
        result
    }

    /// Serves HTTP exchanges. Returns the accepted upgrade, if the
    /// connection switches protocols.
    async fn serve(&mut self) -> anyhow::Result<Option<Upgrade>> {
        loop {
            let Some(req) = self.read_request().await? else {
                return Ok(None);
            };

            let endpoint = if req.headers().contains("Upgrade") {
                self.ctx.upgrades.route(&req.path())
            } else {
                None
            };

            if let Some(endpoint) = endpoint {
                match handshake::validate(&req) {
                    Ok(handshake) => {
                        return Ok(Some(Upgrade {
                            req,
                            handshake,
                            endpoint,
                        }));
                    }
                    Err(e) => {
                        tracing::warn!(peer = ?self.peer, target = %req.target(), error = %e, "websocket handshake rejected");
                        self.state = ConnectionState::WritingResponse;
                        let keep_alive = req.keep_alive();
                        self.write(e.to_response(keep_alive)).await?;
                        if !keep_alive {
                            return Ok(None);
                        }
                        continue;
                    }
                }
            }

            if !self.dispatch(req).await? {
                return Ok(None);
            }
        }
    }

    /// Reads the next complete request, or `None` when the connection
    /// should close.
    async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        self.state = ConnectionState::AwaitingRequest;
        let limits = self.ctx.limits;
        let mut parser = HeadParser::new(limits);

        let mut head = loop {
            if !self.buffer.is_empty() {
                match parser.feed(&self.buffer) {
                    Ok(Status::Complete(head, used)) => {
                        self.buffer.advance(used);
                        break head;
                    }
                    Ok(Status::Partial) => self.buffer.clear(),
                    Err(e) => return self.reject(e).await,
                }
                if parser.in_progress() {
                    self.state = ConnectionState::ReadingHeaders;
                }
            }

            match self.fill().await? {
                Fill::Data => {}
                Fill::Eof if parser.in_progress() => return self.reject(ParseError::Truncated).await,
                Fill::Eof => return Ok(None),
                Fill::TimedOut => return self.time_out(parser.in_progress()).await,
            }
        };

        let framing = match Framing::for_request(&head.headers, &limits) {
            Ok(framing) => framing,
            Err(e) => return self.reject(e).await,
        };

        if expects_continue(&head, framing) && self.buffer.is_empty() {
            self.write(Bytes::from_static(CONTINUE)).await?;
        }

        self.state = ConnectionState::ReadingBody;
        let mut decoder = BodyDecoder::new(framing, &limits);
        let mut body = BytesMut::new();

        loop {
            match decoder.decode(&self.buffer, &mut body) {
                Ok(Status::Complete((), used)) => {
                    self.buffer.advance(used);
                    break;
                }
                Ok(Status::Partial) => self.buffer.clear(),
                Err(e) => return self.reject(e).await,
            }

            match self.fill().await? {
                Fill::Data => {}
                Fill::Eof => {
                    if let Err(e) = decoder.finish_at_eof() {
                        return self.reject(e).await;
                    }
                    break;
                }
                Fill::TimedOut => return self.time_out(true).await,
            }
        }

        head.headers.merge(decoder.take_trailers());
        Ok(Some(Request::from_parts(head, body.freeze(), self.peer)))
    }

    async fn fill(&mut self) -> std::io::Result<Fill> {
        self.buffer.reserve(READ_CHUNK);
        let read = self.stream.read_buf(&mut self.buffer);

        let n = match self.ctx.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(res) => res?,
                Err(_) => return Ok(Fill::TimedOut),
            },
            None => read.await?,
        };

        Ok(if n == 0 { Fill::Eof } else { Fill::Data })
    }

    /// Answers a malformed message and gives up on the connection.
    async fn reject(&mut self, err: ParseError) -> anyhow::Result<Option<Request>> {
        tracing::warn!(peer = ?self.peer, error = %err, "rejecting request");
        self.state = ConnectionState::WritingResponse;

        let status = err.status();
        let response = plain_response(status, status.reason_phrase(), true, &Headers::new());
        // The peer may already be gone.
        let _ = self.write(response).await;
        Ok(None)
    }

    async fn time_out(&mut self, partial: bool) -> anyhow::Result<Option<Request>> {
        tracing::debug!(peer = ?self.peer, partial, "idle timeout");
        if partial {
            self.state = ConnectionState::WritingResponse;
            let status = StatusCode::RequestTimeout;
            let response = plain_response(status, status.reason_phrase(), true, &Headers::new());
            let _ = self.write(response).await;
        }
        Ok(None)
    }

    /// Runs the handler chain, streaming whatever the handlers flush.
    /// Returns whether the connection stays open.
    async fn dispatch(&mut self, mut req: Request) -> anyhow::Result<bool> {
        self.state = ConnectionState::Dispatching;
        let ctx = Arc::clone(&self.ctx);

        let (tx, rx) = mpsc::channel::<Bytes>(RESPONSE_QUEUE);
        let mut rx = Some(rx);
        let mut resp = Response::new(req.version(), req.method(), req.keep_alive()).with_sink(tx);
        let mut write_error = None;
        self.buffer.reserve(READ_CHUNK);

        let outcome = {
            let dispatch = ctx.chain.dispatch(&mut req, &mut resp);
            tokio::pin!(dispatch);

            loop {
                tokio::select! {
                    biased;

                    outcome = &mut dispatch => break Some(outcome),
                    Some(chunk) = recv(&mut rx), if rx.is_some() => {
                        if let Err(e) = ResponseWriter::new(chunk).write_to_stream(&mut self.stream).await {
                            // Dropping the receiver fails the handler's next flush.
                            rx = None;
                            write_error = Some(e);
                        }
                    }
                    read = self.stream.read_buf(&mut self.buffer), if self.buffer.len() < READ_AHEAD_LIMIT => {
                        match read {
                            Ok(0) => {
                                tracing::debug!(peer = ?self.peer, "peer closed during dispatch");
                                break None;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(peer = ?self.peer, error = %e, "read failed during dispatch");
                                break None;
                            }
                        }
                    }
                }
            }
        };

        // Leaving the block above dropped the handler future.
        let Some(outcome) = outcome else {
            return Ok(false);
        };

        if let Some(e) = write_error {
            tracing::debug!(peer = ?self.peer, error = %e, "peer went away mid-response");
            return Ok(false);
        }

        match outcome {
            Outcome::Handled => {}
            Outcome::Unhandled => {
                if resp.state() == ResponseState::NotStarted {
                    resp.replace_with_error(StatusCode::NotFound, NotFound::BODY);
                }
            }
            Outcome::Failed(_) => {
                if !resp.replace_with_error(StatusCode::InternalServerError, "Internal Server Error") {
                    // Part of the response is already out; its framing can't
                    // be trusted any more.
                    resp.disable_keep_alive();
                    self.write_queued(&mut rx).await?;
                    return Ok(false);
                }
            }
        }

        if let Err(e) = resp.finish() {
            tracing::warn!(peer = ?self.peer, error = %e, "response finished out of contract");
            resp.disable_keep_alive();
        }

        self.state = ConnectionState::WritingResponse;
        self.write_queued(&mut rx).await?;
        self.write(resp.take_output()).await?;

        tracing::debug!(
            peer = ?self.peer,
            method = %req.method(),
            target = %req.target(),
            status = resp.status().as_u16(),
            "request served"
        );

        Ok(resp.keep_alive())
    }

    /// Writes chunks a handler flushed that the dispatch loop has not sent.
    async fn write_queued(&mut self, rx: &mut Option<mpsc::Receiver<Bytes>>) -> anyhow::Result<()> {
        if let Some(rx) = rx {
            while let Ok(chunk) = rx.try_recv() {
                ResponseWriter::new(chunk)
                    .write_to_stream(&mut self.stream)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write(&mut self, bytes: Bytes) -> anyhow::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        ResponseWriter::new(bytes).write_to_stream(&mut self.stream).await
    }

    async fn upgrade(&mut self, upgrade: Upgrade) -> anyhow::Result<()> {
        let Upgrade {
            req,
            handshake,
            endpoint,
        } = upgrade;
        let protocol = endpoint
            .select_protocol(&handshake.offered_protocols)
            .filter(|p| handshake.offered_protocols.contains(p));

        self.state = ConnectionState::WritingResponse;
        self.write(handshake::switching_protocols(&handshake.accept_key, protocol.as_deref()))
            .await?;
        tracing::info!(peer = ?self.peer, target = %req.target(), "upgraded to websocket");

        let leftover = self.buffer.split();
        socket::serve(
            &mut self.stream,
            leftover,
            &req,
            endpoint,
            self.ctx.max_ws_payload,
            self.shutdown.clone(),
        )
        .await
    }
}

async fn recv(rx: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

fn expects_continue(head: &RequestHead, framing: Framing) -> bool {
    head.version == Version::Http11
        && framing != Framing::Empty
        && head.headers.has_token("Expect", "100-continue")
}
