//! Request-level error taxonomy and its HTTP mapping.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::blobs::StoreError;
use crate::policy::DenyReason;
use crate::token::{TokenError, AUTH_SCHEME};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Authentication(#[from] TokenError),
    #[error(transparent)]
    Authorization(#[from] DenyReason),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists(key) => ApiError::Conflict(format!("{key} already exists")),
            e @ StoreError::HashMismatch { .. } => ApiError::Validation(e.to_string()),
            other => ApiError::Storage(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Storage(e) => {
                tracing::error!("storage failure: {e}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "error": message }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, AUTH_SCHEME)], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
