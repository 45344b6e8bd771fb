//! # Middleware Module
//!
//! The middleware contract ([`Middleware`]) plus the bundled middleware that
//! most services start from: request tracing and request metrics.
//!
//! A middleware accepts the request [`Context`](crate::Context) and a
//! [`Next`](crate::dispatcher::Next) continuation, and decides whether and
//! when to pass control downstream. Closures of the matching shape implement
//! [`Middleware`] directly:
//!
//! ```rust
//! use midstack::{Context, Next, DispatchError};
//!
//! let log_method = |ctx: &mut Context, next: Next<'_>| -> Result<(), DispatchError> {
//!     tracing::debug!(method = %ctx.method, "inbound");
//!     next.run(ctx)
//! };
//! # let _ = log_method;
//! ```

mod core;
mod metrics;
mod tracing;

pub use core::{from_fn, Middleware};
pub use metrics::MetricsMiddleware;
pub use tracing::TracingMiddleware;
