//! Handler dispatch chain.
//!
//! Handlers are offered each request in registration order. The first one
//! to claim it ends the scan; a declining handler passes it on; a failing
//! handler ends the scan and leaves the connection to answer with a 500.
//!
//! Distinct connections dispatch concurrently, so handlers must be
//! `Send + Sync` and safe to call from several tasks at once. A single
//! connection never runs two requests through the chain at the same time.

pub mod file_server;
pub mod router;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::request::Request;
use crate::http::response::Response;

pub use file_server::FileServer;
pub use router::{NotFound, Router, UrlRewriter};

/// A request processor.
///
/// Resolves to `Ok(true)` when it handled the request, `Ok(false)` to let
/// the next handler try, or an error to abort the exchange. The future may
/// suspend (store lookups, upstream calls); the connection waits for it.
pub trait Handler: Send + Sync {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, anyhow::Result<bool>>
        + Send
        + Sync,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        (self.f)(req, resp)
    }
}

/// Turns a closure returning a boxed future into a [`Handler`].
///
/// ```ignore
/// let hello = handler_fn(|_req, resp| Box::pin(async move {
///     resp.send(StatusCode::Ok, "hello")?;
///     Ok(true)
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, anyhow::Result<bool>>
        + Send
        + Sync,
{
    FnHandler { f }
}

/// Result of running a request through the chain.
#[derive(Debug)]
pub enum Outcome {
    Handled,
    Unhandled,
    Failed(anyhow::Error),
}

/// Ordered list of handlers.
///
/// Registration is expected to finish before the server starts; the
/// chain is then shared read-only between connections.
#[derive(Default, Clone)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler, returning its position.
    pub fn push(&mut self, handler: impl Handler + 'static) -> usize {
        self.push_arc(Arc::new(handler))
    }

    /// Appends a shared handler, returning its position.
    pub fn push_arc(&mut self, handler: Arc<dyn Handler>) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    /// Inserts a handler ahead of the one currently at `index`.
    ///
    /// Panics if `index > len`, like `Vec::insert`.
    pub fn insert(&mut self, index: usize, handler: impl Handler + 'static) {
        self.handlers.insert(index, Arc::new(handler));
    }

    /// Removes the handler at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<Arc<dyn Handler>> {
        (index < self.handlers.len()).then(|| self.handlers.remove(index))
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offers the request to each handler in turn.
    pub async fn dispatch(&self, req: &mut Request, resp: &mut Response) -> Outcome {
        for (index, handler) in self.handlers.iter().enumerate() {
            match handler.handle(req, resp).await {
                Ok(true) => {
                    tracing::trace!(handler = index, "request handled");
                    return Outcome::Handled;
                }
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(
                        handler = index,
                        method = %req.method(),
                        target = %req.target(),
                        error = %e,
                        "handler failed"
                    );
                    return Outcome::Failed(e);
                }
            }
        }

        tracing::debug!(method = %req.method(), target = %req.target(), "no handler claimed request");
        Outcome::Unhandled
    }
}
