//! Custom error types for the check-in service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Message shown for every failure the operator cannot act on
pub const GENERIC_FAILURE: &str = "An error occurred, please try again";

/// Custom error type for the check-in service
#[derive(Error, Debug)]
pub enum CheckinError {
    /// Input rejected before anything was sent to the store
    #[error("{0}")]
    Validation(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write refused because the record changed underneath
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid operator credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Store failure
    #[error("Store error: {0}")]
    Store(#[source] DatabaseError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckinError {
    pub fn validation(message: impl Into<String>) -> Self {
        CheckinError::Validation(message.into())
    }

    /// Text safe to show the operator
    pub fn user_message(&self) -> String {
        match self {
            CheckinError::Validation(msg) => msg.clone(),
            CheckinError::NotFound(what) => format!("{} was not found", what),
            CheckinError::Conflict(msg) => msg.clone(),
            CheckinError::Unauthorized => "Unauthorized".to_string(),
            CheckinError::Store(_) | CheckinError::Internal(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

impl From<DatabaseError> for CheckinError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => CheckinError::NotFound(what),
            DatabaseError::Conflict(msg) => CheckinError::Conflict(msg),
            other => CheckinError::Store(other),
        }
    }
}

impl IntoResponse for CheckinError {
    fn into_response(self) -> Response {
        let status = match &self {
            CheckinError::Validation(_) => StatusCode::BAD_REQUEST,
            CheckinError::NotFound(_) => StatusCode::NOT_FOUND,
            CheckinError::Conflict(_) => StatusCode::CONFLICT,
            CheckinError::Unauthorized => StatusCode::UNAUTHORIZED,
            CheckinError::Store(e) => {
                error!("Store failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CheckinError::Internal(e) => {
                error!("Internal failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.user_message(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for check-in results
pub type CheckinResult<T> = Result<T, CheckinError>;
