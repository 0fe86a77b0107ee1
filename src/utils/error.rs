use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Upstream service error: {detail}")]
    Upstream {
        detail: String,
        code: Option<u16>,
        metadata: serde_json::Value,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream timeout: {0}")]
    Timeout(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// Provider-side failure with the raw provider payload preserved.
    pub fn upstream(detail: impl Into<String>, code: Option<u16>, metadata: serde_json::Value) -> Self {
        Self::Upstream {
            detail: detail.into(),
            code,
            metadata,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, detail) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::Configuration(msg) => {
                tracing::warn!("Configuration error: {}", msg);
                (StatusCode::BAD_REQUEST, "ConfigurationError", msg)
            }
            ApiError::Authentication(msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "AuthenticationError", msg)
            }
            ApiError::Upstream { detail, code, .. } => {
                tracing::error!("Upstream service error (code {:?}): {}", code, detail);
                (StatusCode::SERVICE_UNAVAILABLE, "UpstreamServiceError", detail)
            }
            ApiError::Transport(msg) => {
                tracing::error!("Transport error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "TransportError", msg)
            }
            ApiError::Timeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "TimeoutError", msg)
            }
            ApiError::MalformedResponse(msg) => {
                tracing::error!("Malformed upstream response: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "MalformedResponseError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            detail,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Configuration("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Authentication("x".into()), StatusCode::UNAUTHORIZED),
            (
                ApiError::upstream("x", Some(503), serde_json::Value::Null),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::Transport("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (
                ApiError::MalformedResponse("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
