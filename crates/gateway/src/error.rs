use http::StatusCode;
use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    InvalidApiKey,
    RateLimited {
        limit_type: &'static str,
        limit: u32,
        retry_after: u64,
    },
    InvalidInput(String),
    UpstreamUnavailable(String),
    UpstreamTimeout,
    UpstreamStatus(u16),
    Config(String),
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidApiKey => "invalid_api_key",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamTimeout => "upstream_timeout",
            GatewayError::UpstreamStatus(_) => "upstream_error",
            GatewayError::Config(_) => "config_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::InvalidApiKey => write!(f, "invalid API key"),
            GatewayError::RateLimited {
                limit_type,
                limit,
                retry_after,
            } => write!(
                f,
                "rate limit exceeded: {} requests per {}, retry after {}s",
                limit, limit_type, retry_after
            ),
            GatewayError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            GatewayError::UpstreamUnavailable(msg) => {
                write!(f, "cannot connect to inference service: {}", msg)
            }
            GatewayError::UpstreamTimeout => write!(f, "inference service timeout"),
            GatewayError::UpstreamStatus(code) => {
                write!(f, "inference service error, status={}", code)
            }
            GatewayError::Config(msg) => write!(f, "config error: {}", msg),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}
