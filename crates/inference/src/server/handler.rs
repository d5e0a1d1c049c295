use super::context::RequestContext;
use super::InferenceState;
use crate::error::InferenceError;
use embedserve_common::{correlation, full_body, BoxBody};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;

#[derive(Deserialize)]
struct EmbedRequest {
    input_text: String,
}

/// Entry point wired into the server's `service_fn`. Hand-routes on method
/// and path, same pattern as the gateway's `proxy::handle_request`.
pub async fn handle_request(
    req: Request<Incoming>,
    state: InferenceState,
    _peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, Infallible> {
    let correlation_id = correlation::extract_or_mint(req.headers(), "inf");
    let ctx = RequestContext::new(
        req.method().to_string(),
        req.uri().path().to_string(),
        correlation_id,
    );

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (hyper::Method::GET, "/health" | "/healthz") => Ok(health(&ctx, &state)),
        (hyper::Method::GET, "/ready" | "/readyz") => Ok(ready(&ctx, &state)),
        (hyper::Method::GET, "/metrics") => Ok(metrics_response(&ctx, &state)),
        (hyper::Method::POST, "/embed") => embed(req, &ctx, &state).await,
        _ => Ok(ctx.error_response(StatusCode::NOT_FOUND, "not found", None, Some("not_found"))),
    };

    let mut response = response.unwrap_or_else(|e: InferenceError| error_to_response(&ctx, e));
    correlation::set_response_header(response.headers_mut(), &ctx.correlation_id);
    Ok(response)
}

fn error_to_response(ctx: &RequestContext, err: InferenceError) -> Response<BoxBody> {
    let message = err.to_string();
    ctx.error_response(err.status_code(), &message, None, Some(err.code()))
}

fn health(ctx: &RequestContext, state: &InferenceState) -> Response<BoxBody> {
    ctx.finalize_metrics(200);
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "model": state.model.name(),
            "device": state.model.device(),
            "queue_size": state.batcher.queue_size(),
            "inflight_batches": state.batcher.inflight_batches(),
        }),
        ctx,
    )
}

fn ready(ctx: &RequestContext, _state: &InferenceState) -> Response<BoxBody> {
    // The model and batcher are constructed during bootstrap before the
    // accept loop starts, so by the time a request reaches this handler
    // the service is always ready; kept as its own route (rather than
    // folded into `/health`) to match the external interface table.
    ctx.finalize_metrics(200);
    json_response(StatusCode::OK, &json!({"status": "ready"}), ctx)
}

fn metrics_response(ctx: &RequestContext, state: &InferenceState) -> Response<BoxBody> {
    let body = state.metrics.render();
    ctx.finalize_metrics(200);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .header("x-correlation-id", ctx.correlation_id.as_str())
        .body(full_body(body))
        .expect("static header set is always valid")
}

const MAX_INPUT_LEN: usize = 1024;

async fn embed(
    req: Request<Incoming>,
    ctx: &RequestContext,
    state: &InferenceState,
) -> Result<Response<BoxBody>, InferenceError> {
    let body_bytes = req
        .collect()
        .await
        .map_err(|e| InferenceError::InvalidInput(e.to_string()))?
        .to_bytes();

    let parsed: EmbedRequest = serde_json::from_slice(&body_bytes)
        .map_err(|e| InferenceError::InvalidInput(format!("malformed request body: {e}")))?;

    let trimmed = parsed.input_text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_INPUT_LEN {
        return Err(InferenceError::InvalidInput(format!(
            "input_text must be 1..{MAX_INPUT_LEN} characters after trimming"
        )));
    }

    let embedding = state.batcher.predict(trimmed.to_string()).await?;

    ctx.finalize_metrics(200);
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "embedding": embedding,
            "model": state.model.name(),
        }),
        ctx,
    ))
}

fn json_response(status: StatusCode, body: &serde_json::Value, ctx: &RequestContext) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-correlation-id", ctx.correlation_id.as_str())
        .body(full_body(body.to_string()))
        .expect("static header set is always valid")
}
