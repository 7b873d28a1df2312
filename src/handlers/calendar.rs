use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::errors::AppError;
use crate::services::calendar;
use crate::state::AppState;

// GET /calendar/:appointment_id
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<String>,
) -> Result<Response, AppError> {
    let appointment = state
        .store
        .get_appointment(&appointment_id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
    let business = state
        .store
        .get_business(&appointment.business_id)?
        .ok_or_else(|| AppError::NotFound(format!("business {}", appointment.business_id)))?;

    let ics = calendar::generate_ics(&appointment, &business.name);

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"appointment.ics\"",
            ),
        ],
        ics,
    )
        .into_response())
}
