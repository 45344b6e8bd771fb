//! # midstack
//!
//! **midstack** is a coroutine-powered middleware dispatch chain and path
//! router for Rust, built on the `may` runtime.
//!
//! ## Overview
//!
//! midstack composes an ordered list of middleware into a single
//! onion-shaped chain per request and routes requests to path-specific
//! handler stacks. Declarative path patterns (named parameters, optional and
//! repeat modifiers, custom character classes) compile once at startup into
//! regex matchers; at request time the router resolves every matching route,
//! extracts and percent-decodes its parameters, and hands the concatenated
//! middleware list to the dispatch chain. Named routes support reverse URL
//! generation for redirects and templating.
//!
//! ## Architecture
//!
//! - **[`context`]** - Per-request mutable state (method, path, params,
//!   response in progress), exactly one per inbound request
//! - **[`dispatcher`]** - The chain driver: explicit-cursor continuation
//!   passing with a double-invocation guard
//! - **[`middleware`]** - The [`Middleware`] contract plus bundled tracing
//!   and metrics middleware
//! - **[`router`]** - Pattern compilation, route resolution, parameter
//!   interceptors and reverse URL lookup
//! - **[`server`]** - HTTP adapter built on `may_minihttp` with
//!   request/response plumbing
//!
//! ## Request Flow
//!
//! 1. The server adapter parses the raw request into a [`Context`]
//! 2. The router collects every bare middleware and every matching route's
//!    stack into one ordered list
//! 3. The dispatch chain runs the list: each middleware may mutate the
//!    context, pass control downstream via [`Next`], and post-process after
//!    the downstream chain completes
//! 4. The server adapter writes the context's accumulated status, headers
//!    and body to the wire
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use midstack::{Context, DispatchError, Next, Router};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = Router::new();
//!
//! // Bare middleware runs for every request, wrapping everything downstream.
//! router.use_middleware(|ctx: &mut Context, next: Next<'_>| {
//!     let before = std::time::Instant::now();
//!     let result = next.run(ctx);
//!     tracing::debug!(elapsed_us = before.elapsed().as_micros() as u64, "handled");
//!     result
//! });
//!
//! router.get("/greetings/:name", |ctx: &mut Context, _next: Next<'_>| {
//!     let name = ctx.param("name").unwrap_or("world").to_string();
//!     ctx.text(200, format!("hello, {name}"));
//!     Ok::<(), DispatchError>(())
//! })?;
//!
//! let mut ctx = Context::new(Method::GET, "/greetings/rustacean");
//! router.dispatch(&mut ctx)?;
//! assert_eq!(ctx.status, Some(200));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Many requests are in flight concurrently, each on its own `may`
//! coroutine; within one request the chain is strictly sequential. Router
//! and route state is mutable only while configuring (`&mut self`) and
//! read-only once shared — the borrow system enforces the
//! configuration-before-traffic seal, so the dispatch path takes no locks.

pub mod context;
pub mod dispatcher;
pub mod ids;
pub mod middleware;
pub mod router;
pub mod server;

pub use context::{Body, Context, HeaderVec, ParamVec, MAX_INLINE_HEADERS, MAX_INLINE_PARAMS};
pub use dispatcher::{dispatch, DispatchError, Next};
pub use ids::RequestId;
pub use middleware::{from_fn, MetricsMiddleware, Middleware, TracingMiddleware};
pub use router::{PatternError, Route, RouteOptions, Router, RouterError, UrlQuery};
pub use server::{AppService, HttpServer};
