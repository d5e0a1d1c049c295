use bytes::Bytes;
use http_body_util::{BodyExt, Full};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Builds the standard `{"error": ..., "detail": ..., "code": ...}` envelope
/// used by both services for every non-2xx response.
pub fn error_body(error: &str, detail: Option<&str>, code: Option<&str>) -> BoxBody {
    let value = serde_json::json!({
        "error": error,
        "detail": detail,
        "code": code,
    });
    full_body(value.to_string())
}
