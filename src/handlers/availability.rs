use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::services::availability;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub business_id: String,
    pub service_id: String,
    pub date: String,
}

#[derive(Serialize)]
pub struct SlotResponse {
    start_at: String,
    end_at: String,
}

// GET /api/availability?business_id=..&service_id=..&date=YYYY-MM-DD
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<SlotResponse>>, AppError> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("invalid date: {}", query.date)))?;

    let slots = availability::open_slots(
        state.store.as_ref(),
        &query.business_id,
        &query.service_id,
        date,
        Utc::now().naive_utc(),
        state.config.booking_horizon_days,
        state.config.slot_granularity_minutes,
    )?;

    Ok(Json(
        slots
            .into_iter()
            .map(|s| SlotResponse {
                start_at: s.start_at.format("%Y-%m-%d %H:%M").to_string(),
                end_at: s.end_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect(),
    ))
}
