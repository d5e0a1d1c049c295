use super::context::RequestContext;
use crate::auth::{self, AuthenticatedUser};
use crate::error::GatewayError;
use crate::server::GatewayState;
use embedserve_common::{correlation, full_body, BoxBody};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;

const MAX_INPUT_LEN: usize = 1024;

#[derive(Deserialize)]
struct EmbedRequest {
    input_text: String,
}

/// Entry point wired into the server's `service_fn`. Hand-routes on
/// method and path — the teacher's admin server does the same for its
/// fixed set of routes, so a router crate isn't pulled in here either.
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    _peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, Infallible> {
    let correlation_id = correlation::extract_or_mint(req.headers(), "gw");
    let ctx = RequestContext::new(
        req.method().to_string(),
        req.uri().path().to_string(),
        correlation_id,
    );

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (hyper::Method::GET, "/health" | "/healthz") => health(&ctx, &state).await,
        (hyper::Method::GET, "/ready" | "/readyz") => ready(&ctx, &state),
        (hyper::Method::GET, "/metrics") => Ok(metrics_response(&ctx, &state)),
        (hyper::Method::POST, "/v1/embed") => embed(req, &ctx, &state).await,
        (hyper::Method::GET, "/v1/usage") => usage(req, &ctx, &state).await,
        _ => Ok(ctx.error_response(StatusCode::NOT_FOUND, "not found", None, Some("not_found"))),
    };

    let mut response = response.unwrap_or_else(|e| error_to_response(&ctx, e));
    embedserve_common::correlation::set_response_header(response.headers_mut(), &ctx.correlation_id);
    Ok(response)
}

fn error_to_response(ctx: &RequestContext, err: GatewayError) -> Response<BoxBody> {
    let message = err.to_string();
    let mut response = ctx.error_response(err.status_code(), &message, None, Some(err.code()));

    if let GatewayError::RateLimited {
        limit_type: _,
        limit,
        retry_after,
    } = &err
    {
        let headers = response.headers_mut();
        headers.insert("retry-after", retry_after.to_string().parse().unwrap());
        headers.insert("x-ratelimit-limit", limit.to_string().parse().unwrap());
        headers.insert(
            "x-ratelimit-reset",
            retry_after.to_string().parse().unwrap(),
        );
    }
    if matches!(err, GatewayError::InvalidApiKey) {
        response
            .headers_mut()
            .insert("www-authenticate", "Bearer".parse().unwrap());
    }
    response
}

async fn health(ctx: &RequestContext, state: &GatewayState) -> Result<Response<BoxBody>, GatewayError> {
    let inference = state
        .http_client
        .get(format!("{}/health", state.config.inference_url))
        .timeout(std::time::Duration::from_secs(2))
        .send()
        .await;

    let (status, inference_status) = match inference {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value =
                resp.json().await.unwrap_or(json!({"status": "unknown"}));
            ("ok", body)
        }
        Ok(resp) => (
            "degraded",
            json!({"status": "error", "http_status": resp.status().as_u16()}),
        ),
        Err(e) => (
            "degraded",
            json!({"status": "unreachable", "error": e.to_string()}),
        ),
    };

    ctx.finalize_metrics(200);
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "status": status,
            "gateway_version": env!("CARGO_PKG_VERSION"),
            "inference": inference_status,
        }),
        ctx,
    ))
}

fn ready(ctx: &RequestContext, state: &GatewayState) -> Result<Response<BoxBody>, GatewayError> {
    let is_ready = !state.config.inference_url.is_empty();
    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    ctx.finalize_metrics(status.as_u16());
    Ok(json_response(
        status,
        &json!({"status": if is_ready { "ready" } else { "not_ready" }}),
        ctx,
    ))
}

fn metrics_response(ctx: &RequestContext, state: &GatewayState) -> Response<BoxBody> {
    let body = state.metrics.render();
    ctx.finalize_metrics(200);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .header("x-correlation-id", ctx.correlation_id.as_str())
        .body(full_body(body))
        .expect("static header set is always valid")
}

async fn authenticate_request(
    req: &Request<Incoming>,
    state: &GatewayState,
) -> Result<AuthenticatedUser, GatewayError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(GatewayError::InvalidApiKey)?;

    let user = auth::authenticate(
        &state.api_key_store,
        &state.rate_limiter,
        state.config.bypass_rate_limits,
        token,
    )
    .await;

    match &user {
        Ok(_) => {
            metrics::counter!("gateway_rate_limit_allowed_total").increment(1);
        }
        Err(GatewayError::InvalidApiKey) => {
            metrics::counter!("gateway_auth_failures_total").increment(1);
        }
        Err(GatewayError::RateLimited { .. }) => {
            metrics::counter!("gateway_rate_limit_rejected_total").increment(1);
        }
        Err(_) => {}
    }

    user
}

async fn embed(
    req: Request<Incoming>,
    ctx: &RequestContext,
    state: &GatewayState,
) -> Result<Response<BoxBody>, GatewayError> {
    authenticate_request(&req, state).await?;

    let body_bytes = req
        .collect()
        .await
        .map_err(|e| GatewayError::InvalidInput(e.to_string()))?
        .to_bytes();

    let parsed: EmbedRequest = serde_json::from_slice(&body_bytes)
        .map_err(|e| GatewayError::InvalidInput(format!("malformed request body: {e}")))?;

    let trimmed = parsed.input_text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_INPUT_LEN {
        return Err(GatewayError::InvalidInput(format!(
            "input_text must be 1..{MAX_INPUT_LEN} characters after trimming"
        )));
    }

    let upstream_start = std::time::Instant::now();
    let result = state
        .http_client
        .post(format!("{}/embed", state.config.inference_url))
        .header("content-type", "application/json")
        .header("x-correlation-id", ctx.correlation_id.as_str())
        .json(&json!({"input_text": trimmed}))
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await;

    metrics::histogram!("gateway_upstream_request_duration_seconds")
        .record(upstream_start.elapsed().as_secs_f64());

    let resp = match result {
        Ok(r) => r,
        Err(e) if e.is_timeout() => return Err(GatewayError::UpstreamTimeout),
        Err(e) => return Err(GatewayError::UpstreamUnavailable(e.to_string())),
    };

    if !resp.status().is_success() {
        return Err(GatewayError::UpstreamStatus(resp.status().as_u16()));
    }

    let payload: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| GatewayError::UpstreamUnavailable(format!("malformed upstream body: {e}")))?;

    if payload.get("embedding").is_none() || payload.get("model").is_none() {
        return Err(GatewayError::UpstreamUnavailable(
            "upstream response missing embedding/model".to_string(),
        ));
    }

    ctx.finalize_metrics(200);
    Ok(json_response(StatusCode::OK, &payload, ctx))
}

async fn usage(
    req: Request<Incoming>,
    ctx: &RequestContext,
    state: &GatewayState,
) -> Result<Response<BoxBody>, GatewayError> {
    let user = authenticate_request(&req, state).await?;
    let usage = state.rate_limiter.usage(&user.record.user_id).await;

    ctx.finalize_metrics(200);
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "user_id": user.record.user_id,
            "usage": {
                "count_last_minute": usage.requests_last_minute,
                "count_last_hour": usage.requests_last_hour,
            },
            "limits": {
                "per_minute": user.record.rate_limit_per_minute,
                "per_hour": user.record.rate_limit_per_hour,
            },
        }),
        ctx,
    ))
}

fn json_response(
    status: StatusCode,
    body: &serde_json::Value,
    ctx: &RequestContext,
) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-correlation-id", ctx.correlation_id.as_str())
        .body(full_body(body.to_string()))
        .expect("static header set is always valid")
}
