//! Correlation-ID extraction, minting and propagation.
//!
//! The original ASGI middleware kept the id in a context-local variable so
//! any handler deep in the call stack could read it back out. Hyper's
//! `service_fn` closures have no equivalent request-local storage, so here
//! the id is threaded explicitly: extracted once per connection/request and
//! passed down through the handler's own call chain instead of stashed in
//! ambient state.

use http::{HeaderMap, HeaderValue};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn correlation_header_name() -> &'static str {
    "X-Correlation-ID"
}

/// Extracts a correlation ID from `X-Correlation-ID` or `X-Request-ID`,
/// minting `{prefix}-{uuid}` when neither is present.
pub fn extract_or_mint(headers: &HeaderMap, prefix: &str) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .or_else(|| headers.get(REQUEST_ID_HEADER))
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| mint(prefix))
}

pub fn mint(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Sets the correlation-ID response header, replacing any existing value so
/// a proxied-through header from upstream is never duplicated.
pub fn set_response_header(headers: &mut HeaderMap, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert("x-correlation-id", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn extracts_existing_correlation_id() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("gw-abc"));
        assert_eq!(extract_or_mint(&headers, "gw"), "gw-abc");
    }

    #[test]
    fn falls_back_to_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-xyz"));
        assert_eq!(extract_or_mint(&headers, "gw"), "req-xyz");
    }

    #[test]
    fn mints_when_absent() {
        let headers = HeaderMap::new();
        let id = extract_or_mint(&headers, "inf");
        assert!(id.starts_with("inf-"));
    }
}
