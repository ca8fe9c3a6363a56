//! HTTP error mapping.
//!
//! Every failure leaves as `{"error": message}`; the status tells not-found
//! apart from caller mistakes and server faults.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde_json::json;
use std::fmt::{Display, Formatter};
use typetree_core::{TreeServiceError, ValidationError};

#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 500
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(message) | Self::NotFound(message) | Self::Internal(message) => {
                message
            }
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status().as_u16(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                "event=http_error module=server status=error code={} error={}",
                status.as_u16(),
                self.message()
            );
        } else {
            warn!(
                "event=http_error module=server status=rejected code={} error={}",
                status.as_u16(),
                self.message()
            );
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<TreeServiceError> for ApiError {
    fn from(value: TreeServiceError) -> Self {
        match value {
            TreeServiceError::Validation(err) => Self::from(err),
            TreeServiceError::NotFound { .. } => Self::NotFound(value.to_string()),
            TreeServiceError::Storage(_) => Self::Internal(value.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        Self::BadRequest(value.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::BadRequest(value.body_text())
    }
}
