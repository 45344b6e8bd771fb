use http::Method;
use may_minihttp::Request;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::{Context, HeaderVec, ParamVec};
use crate::ids::RequestId;

/// Parse query string parameters from a URL path.
///
/// Extracts everything after the `?` character and URL-decodes names and
/// values. Duplicate names are kept in order; the context's last-write-wins
/// accessor resolves them.
#[must_use]
pub fn parse_query_params(path: &str) -> ParamVec {
    let mut params = ParamVec::new();
    if let Some(pos) = path.find('?') {
        for (k, v) in url::form_urlencoded::parse(path[pos + 1..].as_bytes()) {
            params.push((Arc::from(k.as_ref()), v.to_string()));
        }
    }
    params
}

/// Build a request [`Context`] from a raw HTTP request.
///
/// Extracts method, path, query parameters, headers (lowercased) and, when
/// the client sent a JSON body, the parsed body. The request id is taken
/// from an `x-request-id` header when present and valid, otherwise freshly
/// generated.
pub fn parse_request(req: Request) -> Context {
    let raw_path = req.path().to_string();
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let method = match req.method().parse::<Method>() {
        Ok(m) => m,
        Err(_) => {
            warn!(method = %req.method(), "unrecognized HTTP method, treating as GET");
            Method::GET
        }
    };

    let mut headers = HeaderVec::new();
    for h in req.headers() {
        headers.push((
            Arc::from(h.name.to_ascii_lowercase().as_str()),
            String::from_utf8_lossy(h.value).to_string(),
        ));
    }

    let query_params = parse_query_params(&raw_path);

    let request_body = {
        let mut body_str = String::new();
        match req.body().read_to_string(&mut body_str) {
            Ok(size) if size > 0 => match serde_json::from_str(&body_str) {
                Ok(json) => Some(json),
                Err(_) => {
                    debug!(body_size_bytes = size, "request body is not JSON, ignoring");
                    None
                }
            },
            _ => None,
        }
    };

    let request_id = RequestId::from_header_or_new(
        headers
            .iter()
            .find(|(k, _)| k.as_ref() == "x-request-id")
            .map(|(_, v)| v.as_str()),
    );

    debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        header_count = headers.len(),
        query_count = query_params.len(),
        has_body = request_body.is_some(),
        "request parsed"
    );

    Context {
        request_id,
        method,
        path,
        params: ParamVec::new(),
        query_params,
        headers,
        request_body,
        status: None,
        response_headers: HeaderVec::new(),
        body: crate::context::Body::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_params() {
        let params = parse_query_params("/pets?limit=10&tag=a%20b");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0.as_ref(), "limit");
        assert_eq!(params[0].1, "10");
        assert_eq!(params[1].1, "a b");
    }

    #[test]
    fn test_parse_query_params_without_query() {
        assert!(parse_query_params("/pets").is_empty());
    }
}
