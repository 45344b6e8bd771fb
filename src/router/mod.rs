//! # Router Module
//!
//! Path matching, route resolution and reverse URL generation.
//!
//! ## Overview
//!
//! The router owns one ordered stack mixing bare middleware and compiled
//! routes. For each incoming request it:
//!
//! 1. collects every route whose pattern matches the path and whose method
//!    set includes the request method (GET routes also answer HEAD),
//! 2. extracts and percent-decodes each matched route's path parameters into
//!    the request context, merging in registration order,
//! 3. concatenates, in stack order, every bare middleware plus every matched
//!    route's own middleware stack, and
//! 4. hands the resulting list to the dispatch chain.
//!
//! Two routes with the same pattern and overlapping methods are legal: both
//! join the chain in registration order. First-match-wins is not enforced by
//! the router — a handler gets it by setting the response and never calling
//! its continuation. Whether that is the right default is debatable; it is
//! the documented behavior, preserved deliberately.
//!
//! ## Pattern compilation
//!
//! Patterns like `/pets/:id(\d+)` are compiled once, at registration time,
//! into a regex with one capture group per named parameter (see
//! [`pattern`](self) internals). Matching at request time is a single regex
//! pass; nothing about route resolution bypasses the compiled matcher.
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use midstack::{Context, Next, DispatchError, Router};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = Router::new();
//! router.get("/pets/:id", |ctx: &mut Context, _next: Next<'_>| {
//!     let id = ctx.param("id").unwrap_or("?").to_string();
//!     ctx.json(200, serde_json::json!({ "id": id }));
//!     Ok::<(), DispatchError>(())
//! })?;
//!
//! let mut ctx = Context::new(Method::GET, "/pets/42");
//! router.dispatch(&mut ctx)?;
//! assert_eq!(ctx.status, Some(200));
//! # Ok(())
//! # }
//! ```

mod core;
mod error;
mod pattern;
mod route;

pub use core::Router;
pub use error::{PatternError, RouterError};
pub use route::{Route, RouteOptions, UrlQuery};
