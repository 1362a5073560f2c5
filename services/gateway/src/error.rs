use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use types::errors::EngineError;

/// Central error type for the Gateway application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// HTTP status and stable error code for an engine error
pub fn engine_status(err: &EngineError) -> (StatusCode, &'static str) {
    match err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
        EngineError::InsufficientBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
        }
        EngineError::SelfTrade => (StatusCode::UNPROCESSABLE_ENTITY, "SELF_TRADE"),
        EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
        EngineError::UnknownSymbol(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SYMBOL"),
        EngineError::AlreadyFilled { .. } => (StatusCode::CONFLICT, "ALREADY_FILLED"),
        EngineError::EngineUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE"),
        EngineError::TransientPersistence { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_FAILED")
        }
        EngineError::InvariantViolation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            AppError::Engine(err) => {
                let (status, code) = engine_status(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "engine invariant violated");
                    (status, "Internal server error".to_string(), code)
                } else {
                    (status, err.to_string(), code)
                }
            }
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        (status, body).into_response()
    }
}
