use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors a REST handler can end with. Each maps to exactly one response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials.
    #[error("{0}")]
    Authentication(String),

    /// Missing, invalid or expired token. `code` is set for refresh failures.
    #[error("{message}")]
    Authorization {
        message: String,
        code: Option<&'static str>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Unexpected failure. Only `message` reaches the client.
    #[error("{message}: {detail}")]
    Internal {
        message: &'static str,
        detail: String,
    },
}

impl ApiError {
    pub fn internal(message: &'static str, detail: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message,
            detail: detail.to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Authorization {
            message: message.into(),
            code: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, code) = match &self {
            ApiError::Validation(m)
            | ApiError::Authentication(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m) => (m.as_str(), None),
            ApiError::Authorization { message, code } => (message.as_str(), *code),
            ApiError::Internal { message, detail } => {
                tracing::error!(error = %detail, "{message}");
                (*message, None)
            }
        };
        (status, Json(ErrorBody { message, code })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{json, Value};

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn authorization_error_carries_code() {
        let (status, body) = body_of(ApiError::Authorization {
            message: "Invalid refresh token. Please login again.".into(),
            code: Some("INVALID_REFRESH_TOKEN"),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], json!("INVALID_REFRESH_TOKEN"));
    }

    #[tokio::test]
    async fn internal_error_hides_detail() {
        let (status, body) =
            body_of(ApiError::internal("Error signing up user", "sled: io error")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "Error signing up user" }));
    }
}
