use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{connection::ConnectionState, repository::StoreError, state::AppState};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("malformed payload")]
    MalformedPayload,

    #[error("{0}")]
    Validation(&'static str),

    #[error("invalid id")]
    InvalidId,

    #[error("not found")]
    NotFound,

    #[error("database is not connected ({state})")]
    ConnectionUnavailable { state: ConnectionState },

    #[error("timed out after {waited:?} waiting for the database connection ({state})")]
    ConnectionTimeout {
        state: ConnectionState,
        waited: Duration,
    },

    #[error("database connection was lost while waiting ({state})")]
    ConnectionLost { state: ConnectionState },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Attached to 500 responses so [`report_errors`] can log them and, outside
/// production, expose the details in the body.
#[derive(Debug, Clone)]
pub struct InternalFailure {
    pub message: String,
    pub details: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();

        match self {
            AppError::MalformedPayload | AppError::Validation(_) | AppError::InvalidId => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            AppError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            AppError::ConnectionUnavailable { state }
            | AppError::ConnectionTimeout { state, .. }
            | AppError::ConnectionLost { state } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "database unavailable",
                    "message": message,
                    "dbStatus": state,
                })),
            )
                .into_response(),
            AppError::Store(error) => {
                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "internal server error",
                        "message": message,
                    })),
                )
                    .into_response();

                response.extensions_mut().insert(InternalFailure {
                    message,
                    details: format!("{error:?}"),
                });

                response
            }
        }
    }
}

pub async fn report_errors(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let mut response = next.run(request).await;

    let Some(failure) = response.extensions_mut().remove::<InternalFailure>() else {
        return response;
    };

    if state.config.environment.is_production() {
        error!("{method} {uri} failed: {}", failure.message);

        return response;
    }

    error!("{method} {uri} failed: {} ({})", failure.message, failure.details);

    (
        response.status(),
        Json(json!({
            "error": "internal server error",
            "message": failure.message,
            "details": failure.details,
        })),
    )
        .into_response()
}
