//! Dispatch chain core - hot path for middleware execution.
//!
//! Composes an ordered list of middleware into a single invocable unit with
//! onion-shaped control flow: pre-continuation code runs outer-to-inner,
//! post-continuation code runs inner-to-outer. The chain state is an explicit
//! `{furthest-index, stack}` pair rather than a closure-captured counter, so
//! the double-invocation check is a plain integer comparison.

use crate::context::Context;
use crate::middleware::Middleware;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Error produced while a middleware chain is running.
///
/// Dispatch errors are isolated per request: one failing chain never affects
/// concurrently dispatching requests or mutates router state (which is
/// read-only by dispatch time).
#[derive(Debug)]
pub enum DispatchError {
    /// A middleware invoked its continuation more than once.
    ///
    /// `index` is the chain position whose continuation was re-entered.
    /// Never silently ignored: the whole chain fails with this error.
    DoubleInvocation { index: usize },
    /// An application error raised by a handler. Propagates immediately,
    /// aborting the remaining downstream chain.
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wrap an application error raised inside a handler.
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        DispatchError::Handler(err.into())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::DoubleInvocation { index } => {
                write!(f, "next() called multiple times at chain index {index}")
            }
            DispatchError::Handler(err) => write!(f, "handler error: {err}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::DoubleInvocation { .. } => None,
            DispatchError::Handler(err) => Some(err.as_ref()),
        }
    }
}

/// The continuation handed to each middleware.
///
/// `run` executes the remaining downstream chain and returns once all of it
/// (including the implicit terminal no-op) has completed, giving the caller
/// its post-continuation phase. A continuation may be invoked at most once;
/// re-invocation fails with [`DispatchError::DoubleInvocation`].
pub struct Next<'a> {
    index: usize,
    stack: &'a [Arc<dyn Middleware>],
    /// Lowest continuation index still allowed to run, i.e. highest index
    /// reached so far + 1. Shared down the chain; single-threaded per request,
    /// so a `Cell` suffices.
    reached: &'a Cell<usize>,
}

impl Next<'_> {
    /// Run the remaining downstream chain against `ctx`.
    pub fn run(&self, ctx: &mut Context) -> Result<(), DispatchError> {
        // The continuation for position i may run only if i is strictly
        // greater than the highest index reached so far.
        if self.index < self.reached.get() {
            debug!(index = self.index, "continuation re-entered");
            return Err(DispatchError::DoubleInvocation { index: self.index });
        }
        self.reached.set(self.index + 1);
        match self.stack.get(self.index) {
            // Implicit terminal handler: completes immediately.
            None => Ok(()),
            Some(mw) => mw.handle(
                ctx,
                Next {
                    index: self.index + 1,
                    stack: self.stack,
                    reached: self.reached,
                },
            ),
        }
    }
}

/// Execute `stack` against `ctx`, sequentially and single-threaded.
///
/// Middleware at index *i* fully controls whether and when control passes
/// downstream; an error from any middleware aborts the rest of the list and
/// propagates without running outer post-continuation code. The chain never
/// retries a middleware. An empty stack completes immediately.
pub fn dispatch(ctx: &mut Context, stack: &[Arc<dyn Middleware>]) -> Result<(), DispatchError> {
    debug!(
        request_id = %ctx.request_id,
        chain_len = stack.len(),
        "dispatching middleware chain"
    );
    let reached = Cell::new(0);
    Next {
        index: 0,
        stack,
        reached: &reached,
    }
    .run(ctx)
}
