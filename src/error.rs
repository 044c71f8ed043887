use crate::protocol::error_shapes::{auth_error_payload, plain_error_payload};

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Rate limited: status={status}, message={message}")]
    RateLimit { status: u16, message: String },
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream protocol error: {0}")]
    Protocol(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad failure class used for status selection and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authentication,
    RateLimit,
    ServerError,
}

/// Classify a non-2xx upstream status.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        401 => ErrorCategory::Authentication,
        429 | 503 => ErrorCategory::RateLimit,
        _ => ErrorCategory::ServerError,
    }
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Validation(_) => ErrorCategory::Validation,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::RateLimit { .. } => ErrorCategory::RateLimit,
            GatewayError::Config(_)
            | GatewayError::Upstream { .. }
            | GatewayError::Transport(_)
            | GatewayError::Protocol(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimit { .. })
    }

    /// Status code the caller sees for this error.
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            GatewayError::Validation(_) => http::StatusCode::BAD_REQUEST,
            GatewayError::Auth(_) => http::StatusCode::UNAUTHORIZED,
            GatewayError::RateLimit { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::TOO_MANY_REQUESTS),
            GatewayError::Config(_)
            | GatewayError::Upstream { .. }
            | GatewayError::Transport(_)
            | GatewayError::Protocol(_)
            | GatewayError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Format an error as `(status_code, JSON body)`.
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let status = err.http_status();
    let message = err.to_string();
    let body = match err.category() {
        ErrorCategory::Authentication => auth_error_payload(&message),
        _ => plain_error_payload(&message),
    };
    (status, body)
}

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
