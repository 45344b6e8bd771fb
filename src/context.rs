//! Per-request mutable state shared by every middleware in a chain.
//!
//! Exactly one [`Context`] exists per inbound request. It is created by the
//! server adapter (or by test code) before dispatch, mutated in place by the
//! middleware chain, and discarded after the response is written. The core
//! never shares a `Context` across requests, so no synchronization is needed
//! on any of its fields.

use crate::ids::RequestId;
use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of path/query parameters before heap allocation.
/// Most routes declare ≤4 path params, so the common case stays on the stack.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated parameter storage for the dispatch hot path.
///
/// Param names use `Arc<str>` because they come from the static route table
/// (known at startup) and `Arc::clone()` is O(1); values are per-request
/// data from the URL and stay `String`.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Stack-allocated header storage, same key-sharing scheme as [`ParamVec`].
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Response body as a closed set of kinds.
///
/// Middleware and the response writer branch on this enumeration instead of
/// probing a value's runtime shape; a collaborator producing a new body kind
/// must add a variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
}

impl Body {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// The per-request record of inbound and outbound state.
///
/// Inbound fields (`method`, `path`, `query_params`, `headers`) are filled
/// once at construction. `params` is written by the router as matched routes
/// extract their captures. Response fields (`status`, `response_headers`,
/// `body`) accumulate as the chain runs; the core never sets a default
/// status — that is the surrounding server's job.
#[derive(Debug, Clone)]
pub struct Context {
    /// Unique request ID for log correlation
    pub request_id: RequestId,
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Request path, without the query string
    pub path: String,
    /// Path parameters extracted by matched routes, in match order
    pub params: ParamVec,
    /// Query string parameters
    pub query_params: ParamVec,
    /// Request headers (lowercase names)
    pub headers: HeaderVec,
    /// Request body parsed as JSON, when the client sent one
    pub request_body: Option<Value>,
    /// Response status; `None` until some handler sets it
    pub status: Option<u16>,
    /// Response headers accumulated by the chain
    pub response_headers: HeaderVec,
    /// Response body in progress
    pub body: Body,
}

impl Context {
    /// Create a context for the given method and path with a fresh request id.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.to_string(),
            params: ParamVec::new(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            request_body: None,
            status: None,
            response_headers: HeaderVec::new(),
            body: Body::Empty,
        }
    }

    /// Get a path parameter by name.
    ///
    /// Uses "last write wins" semantics: when nested or repeated matches bind
    /// the same name (e.g. `/org/:id/user/:id`), the innermost binding is
    /// returned.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Append a path parameter binding.
    pub fn set_param(&mut self, name: &str, value: String) {
        self.params.push((Arc::from(name), value));
    }

    /// Get a query parameter by name, last occurrence winning
    /// (e.g. `?limit=10&limit=20` yields `20`).
    #[inline]
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a request header by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a response header previously set by the chain.
    #[inline]
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a response header.
    pub fn set_response_header(&mut self, name: &str, value: String) {
        self.response_headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.response_headers.push((Arc::from(name), value));
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Set a JSON response body with the given status.
    pub fn json(&mut self, status: u16, body: Value) {
        self.status = Some(status);
        self.set_response_header("content-type", "application/json".to_string());
        self.body = Body::Json(body);
    }

    /// Set a plain-text response body with the given status.
    pub fn text(&mut self, status: u16, body: impl Into<String>) {
        self.status = Some(status);
        self.set_response_header("content-type", "text/plain".to_string());
        self.body = Body::Text(body.into());
    }

    /// Set redirect status and `Location` header, leaving the body empty.
    pub fn redirect(&mut self, status: u16, location: &str) {
        self.status = Some(status);
        self.set_response_header("location", location.to_string());
    }
}
