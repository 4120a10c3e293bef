//! Stock handlers: a path router, a target rewriter and a 404 fallback.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use regex::Regex;

use crate::dispatch::Handler;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

struct Mapping {
    method: Option<Method>,
    pattern: Regex,
    handler: Arc<dyn Handler>,
}

/// Routes requests by path pattern and, optionally, method.
///
/// Patterns are regular expressions matched against the whole path. Their
/// capture groups become the request's route arguments while the mapped
/// handler runs. Mappings are tried in order; one whose handler declines
/// lets the scan continue.
#[derive(Default)]
pub struct Router {
    mappings: Vec<Mapping>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping and returns its index.
    pub fn map(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<usize, regex::Error> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))?;
        self.mappings.push(Mapping {
            method,
            pattern,
            handler: Arc::new(handler),
        });
        Ok(self.mappings.len() - 1)
    }

    /// Drops the mapping at `index`; later indices shift down.
    pub fn unmap(&mut self, index: usize) {
        if index < self.mappings.len() {
            self.mappings.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.mappings.clear();
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl Handler for Router {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            let path = req.path();

            for mapping in &self.mappings {
                if mapping.method.is_some_and(|m| m != req.method()) {
                    continue;
                }
                let Some(caps) = mapping.pattern.captures(&path) else {
                    continue;
                };

                let args: Vec<String> = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                let previous = req.route_args().to_vec();
                req.set_route_args(args);

                if mapping.handler.handle(req, resp).await? {
                    return Ok(true);
                }
                req.set_route_args(previous);
            }

            Ok(false)
        })
    }
}

/// Rewrites the request target and declines, so later handlers see the
/// new target.
pub struct UrlRewriter {
    target: String,
}

impl UrlRewriter {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Handler for UrlRewriter {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        _resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            tracing::trace!(from = %req.target(), to = %self.target, "rewriting target");
            req.set_target(self.target.clone());
            Ok(false)
        })
    }
}

/// Answers every request with 404.
pub struct NotFound;

impl NotFound {
    pub const BODY: &'static str = "Not found";
}

impl Handler for NotFound {
    fn handle<'a>(
        &'a self,
        _req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            resp.send(StatusCode::NotFound, Self::BODY)?;
            Ok(true)
        })
    }
}
