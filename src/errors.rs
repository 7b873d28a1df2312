use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("date is outside the booking horizon")]
    OutOfRange,

    #[error("{0}")]
    Validation(String),

    #[error("this slot is no longer available")]
    SlotNoLongerAvailable,

    #[error("appointment is {status} and cannot transition to {requested}")]
    InvalidTransition {
        status: &'static str,
        requested: &'static str,
    },

    #[error("reschedule window has closed; the appointment must be cancelled instead")]
    RescheduleWindowViolation,

    #[error("deposit authorization failed")]
    PaymentAuthorizationFailed,
}

impl AppError {
    /// Stable machine-readable code so the presentation layer can pick the
    /// right message without matching on the human-readable text.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::OutOfRange => "out_of_range",
            AppError::Validation(_) => "validation",
            AppError::SlotNoLongerAvailable => "slot_no_longer_available",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::RescheduleWindowViolation => "reschedule_window_violation",
            AppError::PaymentAuthorizationFailed => "payment_authorization_failed",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::OutOfRange | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::SlotNoLongerAvailable
            | AppError::InvalidTransition { .. }
            | AppError::RescheduleWindowViolation => StatusCode::CONFLICT,
            AppError::PaymentAuthorizationFailed => StatusCode::PAYMENT_REQUIRED,
        };

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
