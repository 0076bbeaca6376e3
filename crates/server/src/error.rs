//! HTTP error responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use server_lib::{AnnotateError, StateError};
use std::fmt::{Display, Formatter};

/// Body of every error response
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Invalid request method")
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<AnnotateError> for ApiError {
    fn from(err: AnnotateError) -> Self {
        match err {
            AnnotateError::Validation(_) => Self::bad_request(err.to_string()),
            AnnotateError::Cluster(_) | AnnotateError::ConfirmationTimeout { .. } => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        Self::internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use server_lib::ValidationError;

    #[test]
    fn test_annotate_error_status() {
        let invalid = ApiError::from(AnnotateError::from(ValidationError::new(0, "bad kind")));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let timeout = ApiError::from(AnnotateError::ConfirmationTimeout {
            namespace: "shop".to_string(),
            name: "cart".to_string(),
        });
        assert_eq!(timeout.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(timeout.message.contains("shop/cart"));
    }
}
