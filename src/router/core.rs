//! Router core - hot path for request matching and chain assembly.

use http::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::RouterError;
use super::route::{Route, RouteOptions, UrlQuery};
use crate::context::Context;
use crate::dispatcher::{self, DispatchError};
use crate::middleware::Middleware;

/// Methods covered by an [`all`](Router::all) registration.
const ALL_METHODS: [Method; 4] = [Method::GET, Method::PUT, Method::POST, Method::DELETE];

/// One position in the router's ordered stack: either bare middleware that
/// runs for every request, or a route whose stack joins the chain when its
/// pattern and method set match.
enum Entry {
    Middleware(Arc<dyn Middleware>),
    Route(Route),
}

/// An ordered collection of routes and bare middleware.
///
/// Configuration-time mutable, request-time immutable: every registration
/// method takes `&mut self`, dispatch takes `&self`. Sharing the router
/// (e.g. via `Arc`) seals it — the borrow system guarantees configuration
/// happens-before the first dispatch, so no locking is needed while
/// concurrent requests read it.
#[derive(Default)]
pub struct Router {
    entries: Vec<Entry>,
    /// Globally registered parameter interceptors, remembered so routes
    /// added later also receive them.
    param_interceptors: Vec<(String, Arc<dyn Middleware>)>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("entries", &self.entries.len())
            .field("param_interceptors", &self.param_interceptors.len())
            .finish()
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bare middleware that runs for every request regardless of path,
    /// in registration order.
    pub fn use_middleware<M>(&mut self, mw: M) -> &mut Self
    where
        M: Middleware + 'static,
    {
        self.entries.push(Entry::Middleware(Arc::new(mw)));
        self
    }

    /// Register a route for `pattern` answering to `methods`, with an ordered
    /// handler batch.
    ///
    /// An empty batch fails with [`RouterError::EmptyMiddleware`]; naming a
    /// route (via `opts.name`) never skips that validation. Globally
    /// registered parameter interceptors are applied to the new route before
    /// it joins the stack.
    pub fn add_route(
        &mut self,
        pattern: &str,
        methods: &[Method],
        handlers: Vec<Arc<dyn Middleware>>,
        opts: RouteOptions,
    ) -> Result<&mut Self, RouterError> {
        if handlers.is_empty() {
            return Err(RouterError::EmptyMiddleware {
                pattern: pattern.to_string(),
            });
        }
        let mut route =
            Route::compile(pattern, methods, opts).map_err(|source| RouterError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
        for mw in handlers {
            route.handler(mw);
        }
        for (param, mw) in &self.param_interceptors {
            route.register_param_interceptor(param, Arc::clone(mw));
        }
        info!(
            pattern = %pattern,
            methods = ?methods,
            params = ?route.param_names(),
            name = route.name(),
            "route registered"
        );
        self.entries.push(Entry::Route(route));
        Ok(self)
    }

    /// Register a `GET` route (which also answers `HEAD`).
    pub fn get<M: Middleware + 'static>(
        &mut self,
        pattern: &str,
        handler: M,
    ) -> Result<&mut Self, RouterError> {
        self.add_route(
            pattern,
            &[Method::GET],
            vec![Arc::new(handler)],
            RouteOptions::default(),
        )
    }

    pub fn post<M: Middleware + 'static>(
        &mut self,
        pattern: &str,
        handler: M,
    ) -> Result<&mut Self, RouterError> {
        self.add_route(
            pattern,
            &[Method::POST],
            vec![Arc::new(handler)],
            RouteOptions::default(),
        )
    }

    pub fn put<M: Middleware + 'static>(
        &mut self,
        pattern: &str,
        handler: M,
    ) -> Result<&mut Self, RouterError> {
        self.add_route(
            pattern,
            &[Method::PUT],
            vec![Arc::new(handler)],
            RouteOptions::default(),
        )
    }

    pub fn delete<M: Middleware + 'static>(
        &mut self,
        pattern: &str,
        handler: M,
    ) -> Result<&mut Self, RouterError> {
        self.add_route(
            pattern,
            &[Method::DELETE],
            vec![Arc::new(handler)],
            RouteOptions::default(),
        )
    }

    /// Register one route answering `GET`, `PUT`, `POST` and `DELETE` as a
    /// group.
    pub fn all<M: Middleware + 'static>(
        &mut self,
        pattern: &str,
        handler: M,
    ) -> Result<&mut Self, RouterError> {
        self.add_route(
            pattern,
            &ALL_METHODS,
            vec![Arc::new(handler)],
            RouteOptions::default(),
        )
    }

    /// Register a catch-all route at `source` that answers with `status`
    /// (301 when `None`) and a `Location` header pointing at `destination`.
    ///
    /// Either argument may be a literal path (starting with `/`) or the name
    /// of a registered route; an unresolvable name fails with
    /// [`RouterError::RedirectTarget`] at registration time.
    pub fn redirect(
        &mut self,
        source: &str,
        destination: &str,
        status: Option<u16>,
    ) -> Result<&mut Self, RouterError> {
        let source_path = self.resolve_path(source)?;
        let location = self.resolve_path(destination)?;
        let status = status.unwrap_or(301);
        let redirect = RedirectHandler { status, location };
        self.add_route(
            &source_path,
            &ALL_METHODS,
            vec![Arc::new(redirect)],
            RouteOptions::default(),
        )
    }

    fn resolve_path(&self, target: &str) -> Result<String, RouterError> {
        if target.starts_with('/') {
            return Ok(target.to_string());
        }
        let route = self
            .route_by_name(target)
            .ok_or_else(|| RouterError::RedirectTarget {
                target: target.to_string(),
            })?;
        route
            .build_url(&[], None)
            .map_err(|_| RouterError::RedirectTarget {
                target: target.to_string(),
            })
    }

    /// Look up a registered route by name.
    #[must_use]
    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.entries.iter().find_map(|e| match e {
            Entry::Route(r) if r.name() == Some(name) => Some(r),
            _ => None,
        })
    }

    /// Reverse-generate a URL for the named route.
    pub fn url_for(
        &self,
        name: &str,
        params: &[(&str, &str)],
        query: Option<&UrlQuery>,
    ) -> Result<String, RouterError> {
        let route = self
            .route_by_name(name)
            .ok_or_else(|| RouterError::UnknownRoute {
                name: name.to_string(),
            })?;
        route.build_url(params, query)
    }

    /// Register `mw` as the interceptor for parameter `name` on every route
    /// that declares it — both routes already registered and routes added
    /// afterwards.
    pub fn param<M: Middleware + 'static>(&mut self, name: &str, mw: M) -> &mut Self {
        let mw: Arc<dyn Middleware> = Arc::new(mw);
        for entry in &mut self.entries {
            if let Entry::Route(route) = entry {
                route.register_param_interceptor(name, Arc::clone(&mw));
            }
        }
        self.param_interceptors.push((name.to_string(), mw));
        self
    }

    /// Dispatch entry point: compute the ordered match set for the context's
    /// method and path, build the concatenated middleware list, and hand it
    /// to the dispatch chain.
    ///
    /// When nothing matches and no bare middleware is registered, the chain
    /// is empty and completes immediately; defaulting to a "not found"
    /// response is the surrounding server's job, not the router's.
    pub fn dispatch(&self, ctx: &mut Context) -> Result<(), DispatchError> {
        let stack = self.middleware_for(ctx);
        dispatcher::dispatch(ctx, &stack)
    }

    /// Build the effective chain for a request: every bare middleware plus
    /// the stack of every matching route, in entry order. Matched routes'
    /// parameters are extracted (and merged, registration order) into the
    /// context before the chain runs.
    fn middleware_for(&self, ctx: &mut Context) -> Vec<Arc<dyn Middleware>> {
        struct Matched {
            entry: usize,
            captures: Vec<String>,
            implicit_head: bool,
        }

        let mut matched: Vec<Matched> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let Entry::Route(route) = entry else { continue };
            if !route.accepts(&ctx.method) {
                continue;
            }
            let Some(captures) = route.match_captures(&ctx.path) else {
                continue;
            };
            debug!(
                request_id = %ctx.request_id,
                pattern = %route.pattern(),
                captures = ?captures,
                "route matched"
            );
            matched.push(Matched {
                entry: i,
                captures,
                implicit_head: ctx.method == Method::HEAD
                    && !route.explicitly_accepts(&Method::HEAD),
            });
        }

        // HEAD governing rule: when any matching route explicitly registered
        // HEAD, routes matching only via the HEAD-as-GET convention drop out.
        if ctx.method == Method::HEAD && matched.iter().any(|m| !m.implicit_head) {
            matched.retain(|m| !m.implicit_head);
        }

        if matched.is_empty() {
            warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                "no route matched"
            );
        }

        let mut stack: Vec<Arc<dyn Middleware>> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                Entry::Middleware(mw) => stack.push(Arc::clone(mw)),
                Entry::Route(route) => {
                    let Some(m) = matched.iter().find(|m| m.entry == i) else {
                        continue;
                    };
                    ctx.params = route.extract_params(&m.captures, Some(&ctx.params));
                    stack.extend(route.stack_middleware().cloned());
                }
            }
        }
        stack
    }
}

/// Handler registered by [`Router::redirect`]: sets status and `Location`
/// and deliberately never calls its continuation.
struct RedirectHandler {
    status: u16,
    location: String,
}

impl Middleware for RedirectHandler {
    fn handle(
        &self,
        ctx: &mut Context,
        _next: crate::dispatcher::Next<'_>,
    ) -> Result<(), DispatchError> {
        ctx.redirect(self.status, &self.location);
        Ok(())
    }
}
