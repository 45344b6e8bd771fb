//! # Server Module
//!
//! Thin `may_minihttp` adapter around the router core: raw-request parsing
//! into a [`Context`](crate::Context), response writing from the context's
//! accumulated state, and start/stop plumbing for the coroutine HTTP server.
//!
//! This layer owns the response-default policy the core deliberately does
//! not: no status after a successful chain means 404, a failed chain means
//! 500. TLS, cookies, content negotiation and static file transfer are out
//! of scope.

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_query_params, parse_request};
pub use response::{write_json_error, write_response};
pub use service::AppService;
