//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::geo::GeoError;
use crate::store::StoreError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("store error")]
    Store(#[from] StoreError),
}

impl AppError {
    /// Missing document in a CRUD operation.
    pub fn no_document() -> Self {
        Self::NotFound("No document found with that ID".to_string())
    }

    /// Path parameter that is not a document id.
    pub fn invalid_id(value: &str) -> Self {
        Self::BadRequest(format!("Invalid id: {value}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GeoError> for AppError {
    fn from(err: GeoError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Client errors carry their message; server errors stay vague.
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "Something went very wrong!".to_string()
            }
            AppError::Store(StoreError::Duplicate(field)) => {
                format!("Duplicate field value: {field}. Please use another value!")
            }
            AppError::Store(e) => {
                tracing::error!(error = ?e, "store error");
                "Something went very wrong!".to_string()
            }
            _ => self.to_string(),
        };

        let kind = if status.is_client_error() { "fail" } else { "error" };
        (status, Json(json!({ "status": kind, "message": message }))).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
