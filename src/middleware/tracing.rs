use std::time::Instant;

use tracing::{error, info, info_span};

use super::Middleware;
use crate::context::Context;
use crate::dispatcher::{DispatchError, Next};

/// Middleware that wraps the downstream chain in a `tracing` span.
///
/// Opens a `request` span carrying the request id, method and path, runs the
/// continuation inside it, and logs the final status and latency on the way
/// out. Because the span guard lives across `next.run`, every event emitted
/// by downstream middleware is attached to the request span.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), DispatchError> {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
        );
        let _guard = span.enter();

        let start = Instant::now();
        let result = next.run(ctx);
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(
                status = ctx.status.unwrap_or(0),
                latency_ms = latency_ms,
                "request complete"
            ),
            Err(err) => error!(
                error = %err,
                latency_ms = latency_ms,
                "request failed"
            ),
        }
        result
    }
}
