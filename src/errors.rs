use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::{Booking, SlotError};
use crate::services::conflict;
use crate::services::state_machine::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid slot: {0}")]
    Slot(#[from] SlotError),

    #[error("transition refused: {0}")]
    Transition(#[from] TransitionError),

    #[error("slot is occupied by booking {} ({})", .0.id, .0.subject())]
    Conflict(Box<Booking>),

    #[error("booking {original_id} was closed but its replacement was not created: {detail}")]
    PartialFailure { original_id: String, detail: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn booking_not_found(id: &str) -> Self {
        AppError::NotFound(format!("booking {id}"))
    }

    fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({ "error": self.to_string() });
        match self {
            AppError::Transition(TransitionError::MissingField(field)) => {
                body["field"] = serde_json::json!(field);
            }
            AppError::Conflict(blocking) => {
                body["blocking_booking"] = serde_json::to_value(blocking.as_ref())
                    .unwrap_or(serde_json::Value::Null);
                body["displaceable"] =
                    serde_json::json!(conflict::can_displace(&blocking.resource, blocking));
            }
            AppError::PartialFailure { original_id, .. } => {
                body["original_id"] = serde_json::json!(original_id);
                body["replacement_created"] = serde_json::json!(false);
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Slot(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, axum::Json(self.body())).into_response()
    }
}
