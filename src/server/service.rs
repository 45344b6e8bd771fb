use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::error;

use super::request::parse_request;
use super::response::{write_json_error, write_response};
use crate::router::Router;

/// HTTP service gluing the router core to `may_minihttp`.
///
/// For each connection the service parses the raw request into a fresh
/// [`Context`](crate::Context), runs the router's dispatch chain against it,
/// and writes the accumulated response state back to the wire. The router is
/// shared read-only across service clones — it was sealed the moment it went
/// behind the `Arc`, so concurrent request coroutines need no locks.
///
/// Response defaults live here, not in the core: a chain that completes
/// without setting a status yields 404, a chain that fails yields 500 with
/// the error logged under the request id.
#[derive(Clone)]
pub struct AppService {
    pub router: Arc<Router>,
}

impl AppService {
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let mut ctx = parse_request(req);

        match self.router.dispatch(&mut ctx) {
            Ok(()) => {
                if ctx.status.is_none() && ctx.body.is_empty() {
                    write_json_error(
                        res,
                        404,
                        json!({ "error": "Not Found", "path": ctx.path }),
                    );
                    return Ok(());
                }
                write_response(res, &ctx, 200);
            }
            Err(err) => {
                error!(
                    request_id = %ctx.request_id,
                    method = %ctx.method,
                    path = %ctx.path,
                    error = %err,
                    "dispatch failed"
                );
                write_json_error(res, 500, json!({ "error": "Internal Server Error" }));
            }
        }
        Ok(())
    }
}
