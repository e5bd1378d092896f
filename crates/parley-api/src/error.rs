use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use parley_core::CoreError;

/// HTTP-facing wrapper for the core taxonomy. Rate limits carry the
/// remaining-seconds hint in the body; storage failures hide their detail.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            CoreError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.0.to_string() }),
            ),
            CoreError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": self.0.to_string() }),
            ),
            CoreError::RateLimited { remaining_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({
                    "error": self.0.to_string(),
                    "remaining_seconds": remaining_seconds,
                }),
            ),
            CoreError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.0.to_string() }),
            ),
            CoreError::Storage(e) => {
                error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (CoreError::Validation("content"), StatusCode::BAD_REQUEST),
            (
                CoreError::Authorization("not a member"),
                StatusCode::FORBIDDEN,
            ),
            (
                CoreError::RateLimited {
                    remaining_seconds: 25,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (CoreError::NotFound("message"), StatusCode::NOT_FOUND),
            (
                CoreError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
