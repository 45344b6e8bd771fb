use may_minihttp::Response;
use serde_json::Value;

use crate::context::{Body, Context};

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Write the context's accumulated response state to the wire.
///
/// A context with no status falls back to `status` (the surrounding server's
/// default, typically 404). HEAD requests get status and headers but no body.
pub fn write_response(res: &mut Response, ctx: &Context, default_status: u16) {
    let status = ctx.status.unwrap_or(default_status);
    res.status_code(status as usize, status_reason(status));

    for (name, value) in &ctx.response_headers {
        // may_minihttp wants 'static header strings
        let header = format!("{name}: {value}").into_boxed_str();
        res.header(&*Box::leak(header));
    }

    if ctx.method == http::Method::HEAD {
        return;
    }

    match &ctx.body {
        Body::Empty => {}
        Body::Text(s) => res.body_vec(s.clone().into_bytes()),
        Body::Json(v) => res.body_vec(serde_json::to_vec(v).unwrap_or_default()),
        Body::Bytes(b) => res.body_vec(b.clone()),
    }
}

/// Write a JSON error body directly, bypassing the context.
pub fn write_json_error(res: &mut Response, status: u16, body: Value) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: application/json");
    res.body_vec(body.to_string().into_bytes());
}
