use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Appointment, CancelReason};
use crate::services::booking::{self, CreateBookingRequest, LifecycleOutcome};
use crate::state::AppState;

#[derive(Serialize)]
pub struct AppointmentResponse {
    pub id: String,
    pub business_id: String,
    pub client_id: String,
    pub service_name: String,
    pub duration_minutes: i32,
    pub price_minor: i64,
    pub start_at: String,
    pub end_at: String,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub reschedule_count: i32,
    pub rescheduled_from: Option<String>,
    pub created_at: String,
}

impl AppointmentResponse {
    pub fn from_appointment(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id.clone(),
            business_id: appointment.business_id.clone(),
            client_id: appointment.client_id.clone(),
            service_name: appointment.service.name.clone(),
            duration_minutes: appointment.service.duration_minutes,
            price_minor: appointment.service.price_minor,
            start_at: appointment.start_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            end_at: appointment.end_at().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: appointment.status.as_str().to_string(),
            cancel_reason: appointment.cancel_reason.map(|r| r.as_str().to_string()),
            reschedule_count: appointment.reschedule_count,
            rescheduled_from: appointment.rescheduled_from.clone(),
            created_at: appointment.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct LifecycleResponse {
    pub appointment: AppointmentResponse,
    pub fee_minor: i64,
    pub fee_collected: bool,
    pub reason: String,
}

impl LifecycleResponse {
    pub fn from_outcome(outcome: &LifecycleOutcome) -> Self {
        Self {
            appointment: AppointmentResponse::from_appointment(&outcome.appointment),
            fee_minor: outcome.fee_minor,
            fee_collected: outcome.fee_collected,
            reason: outcome.reason.as_str().to_string(),
        }
    }
}

pub fn parse_start(s: &str) -> Result<NaiveDateTime, AppError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("invalid start time: {s}")))
}

#[derive(Deserialize)]
pub struct CreateBookingBody {
    pub business_id: String,
    pub client_id: String,
    pub service_id: String,
    pub start_at: String,
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBookingBody>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let request = CreateBookingRequest {
        business_id: body.business_id,
        client_id: body.client_id,
        service_id: body.service_id,
        start_at: parse_start(&body.start_at)?,
    };

    let appointment = booking::create_booking(&state, request, Utc::now().naive_utc()).await?;
    Ok(Json(AppointmentResponse::from_appointment(&appointment)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .store
        .get_appointment(&id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?;
    Ok(Json(AppointmentResponse::from_appointment(&appointment)))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, AppError> {
    let outcome = booking::cancel_booking(
        &state,
        &id,
        CancelReason::ClientRequest,
        Utc::now().naive_utc(),
    )
    .await?;
    Ok(Json(LifecycleResponse::from_outcome(&outcome)))
}

#[derive(Deserialize)]
pub struct RescheduleBody {
    pub new_start: String,
}

// POST /api/bookings/:id/reschedule
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<LifecycleResponse>, AppError> {
    let new_start = parse_start(&body.new_start)?;
    let outcome =
        booking::reschedule_booking(&state, &id, new_start, Utc::now().naive_utc()).await?;
    Ok(Json(LifecycleResponse::from_outcome(&outcome)))
}
