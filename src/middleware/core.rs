use crate::context::Context;
use crate::dispatcher::{DispatchError, Next};

/// A unit of request-handling behavior.
///
/// A middleware may inspect or mutate the context before invoking the
/// continuation, invoke the continuation exactly once or not at all, and
/// inspect or mutate the context after the continuation completes. Ordering
/// of middleware in a chain is significant and preserved.
///
/// Implementations must be `Send + Sync`: the router shares them read-only
/// across concurrently dispatching request coroutines.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), DispatchError>;
}

impl<F> Middleware for F
where
    F: Fn(&mut Context, Next<'_>) -> Result<(), DispatchError> + Send + Sync,
{
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), DispatchError> {
        self(ctx, next)
    }
}

// Shared middleware (e.g. a metrics instance the caller keeps a handle to)
// can be registered as `Arc<M>` directly.
impl<M> Middleware for std::sync::Arc<M>
where
    M: Middleware + ?Sized,
{
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), DispatchError> {
        (**self).handle(ctx, next)
    }
}

/// Wrap a closure as a middleware.
///
/// Purely a readability aid at registration sites; the blanket impl above
/// already covers closures of the right shape.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut Context, Next<'_>) -> Result<(), DispatchError> + Send + Sync,
{
    f
}
