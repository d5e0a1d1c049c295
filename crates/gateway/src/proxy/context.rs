use embedserve_common::{error_body, BoxBody};
use http::StatusCode;
use std::time::Instant;

/// Per-request context threaded explicitly through the handler's phases.
/// The correlation ID has no task-local home here (see the crate-level
/// note in `embedserve_common::correlation`), so it travels as a plain
/// field the way the rest of this context already tracked timing.
pub struct RequestContext {
    pub method: String,
    pub route: String,
    pub correlation_id: String,
    pub start: Instant,
}

impl RequestContext {
    pub fn new(method: String, route: String, correlation_id: String) -> Self {
        Self {
            method,
            route,
            correlation_id,
            start: Instant::now(),
        }
    }

    /// Builds a JSON error response and records metrics in one place —
    /// the single exit point for every error path.
    pub fn error_response(
        &self,
        status: StatusCode,
        error: &str,
        detail: Option<&str>,
        code: Option<&str>,
    ) -> hyper::Response<BoxBody> {
        self.finalize_metrics(status.as_u16());

        hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("x-correlation-id", self.correlation_id.as_str())
            .body(error_body(error, detail, code))
            .expect("static header set is always valid")
    }

    pub fn finalize_metrics(&self, status_code: u16) {
        metrics::counter!(
            "gateway_http_requests_total",
            "route" => self.route.clone(),
            "method" => self.method.clone(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "route" => self.route.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
