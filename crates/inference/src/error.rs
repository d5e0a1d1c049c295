use http::StatusCode;
use std::fmt;

#[derive(Debug, Clone)]
pub enum InferenceError {
    NotReady,
    InvalidInput(String),
    BatcherNotStarted,
    BatcherShuttingDown,
    ModelFailure(String),
    Timeout,
}

impl InferenceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InferenceError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferenceError::BatcherNotStarted => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::BatcherShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::ModelFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            InferenceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            InferenceError::NotReady => "not_ready",
            InferenceError::InvalidInput(_) => "invalid_input",
            InferenceError::BatcherNotStarted => "batcher_not_started",
            InferenceError::BatcherShuttingDown => "batcher_shutting_down",
            InferenceError::ModelFailure(_) => "model_failure",
            InferenceError::Timeout => "timeout",
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::NotReady => write!(f, "service not ready"),
            InferenceError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            InferenceError::BatcherNotStarted => write!(f, "batcher not started"),
            InferenceError::BatcherShuttingDown => write!(f, "batcher shutting down"),
            InferenceError::ModelFailure(msg) => write!(f, "model failure: {}", msg),
            InferenceError::Timeout => write!(f, "request timeout"),
        }
    }
}

impl std::error::Error for InferenceError {}
