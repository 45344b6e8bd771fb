//! # Dispatcher Module
//!
//! The dispatcher composes an ordered list of middleware into one invocable
//! unit and drives a single request's pass through it.
//!
//! ## Execution model
//!
//! Each inbound request is processed by exactly one pass through the chain,
//! on one `may` coroutine. Middleware receive the request [`Context`] and a
//! [`Next`] continuation:
//!
//! - code before `next.run(ctx)` executes outer-to-inner, in registration
//!   order;
//! - `next.run(ctx)` returns only after the entire downstream sub-chain
//!   (and the implicit terminal no-op) has completed;
//! - code after `next.run(ctx)` executes inner-to-outer (LIFO unwind).
//!
//! A middleware may invoke its continuation once or not at all. Invoking it
//! twice fails the whole chain with [`DispatchError::DoubleInvocation`];
//! downstream middleware will already have run exactly once by the time the
//! failure surfaces.
//!
//! ## Error flow
//!
//! Errors propagate immediately via `?`: remaining downstream middleware do
//! not run, and outer middleware that already passed control downstream do
//! not get their post-continuation phase. Middleware needing cleanup on
//! failure must use scoped guards (`Drop`), not post-continuation code.
//!
//! [`Context`]: crate::Context

mod core;

pub use core::{dispatch, DispatchError, Next};
