use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use notif_protocol::{error_codes, HttpErrorEnvelope};

pub type HttpResult<T> = Result<T, AppError>;

/// The error kinds named in the design's error-handling section, mapped to
/// HTTP status codes at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid user id: {0}")]
    InvalidUser(String),
    #[error("message exceeds maximum size")]
    MessageTooLarge,
    #[error("coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<notif_coordinator::CoordinatorError> for AppError {
    fn from(err: notif_coordinator::CoordinatorError) -> Self {
        match err {
            notif_coordinator::CoordinatorError::Unavailable(msg) => Self::CoordinatorUnavailable(msg),
            notif_coordinator::CoordinatorError::Malformed(msg) => Self::CoordinatorUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidUser(_) => (StatusCode::BAD_REQUEST, error_codes::INVALID_USER),
            Self::MessageTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, error_codes::MESSAGE_TOO_LARGE),
            Self::CoordinatorUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::COORDINATOR_UNAVAILABLE)
            }
            Self::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
        };
        json_error(status, code, self.to_string())
    }
}

fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.to_owned(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn invalid_user_maps_to_400_with_invalid_user_code() {
        let response = AppError::InvalidUser("empty".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, error_codes::INVALID_USER);
    }

    #[tokio::test]
    async fn message_too_large_maps_to_413() {
        let response = AppError::MessageTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn coordinator_unavailable_maps_to_500() {
        let response = AppError::CoordinatorUnavailable("timeout".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
