use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::bookings::{parse_start, AppointmentResponse, LifecycleResponse};
use crate::models::{
    BlockedTime, Business, CancelReason, FeeType, Policy, PolicyKind, Service, WorkingHours,
};
use crate::services::booking;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// ── Business & catalog setup ──

#[derive(Deserialize)]
pub struct CreateBusinessBody {
    pub name: String,
    pub timezone: Option<String>,
    pub working_hours: serde_json::Value,
    #[serde(default)]
    pub deposit_forfeit_on_cancel: bool,
}

// POST /api/admin/businesses
pub async fn create_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBusinessBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let working_hours = WorkingHours::from_json(&body.working_hours.to_string())
        .map_err(|e| AppError::Validation(format!("invalid working hours: {e}")))?;

    let business = Business {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        timezone: body.timezone.unwrap_or_else(|| "UTC".to_string()),
        working_hours,
        deposit_forfeit_on_cancel: body.deposit_forfeit_on_cancel,
        active: true,
        created_at: Utc::now().naive_utc(),
    };
    state.store.create_business(&business)?;

    Ok(Json(serde_json::json!({ "id": business.id })))
}

// POST /api/admin/businesses/:id/deactivate
pub async fn deactivate_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let deactivated = state.store.deactivate_business(&id)?;
    if !deactivated {
        return Err(AppError::NotFound(format!("business {id}")));
    }
    Ok(Json(serde_json::json!({ "deactivated": true })))
}

#[derive(Deserialize)]
pub struct CreateServiceBody {
    pub business_id: String,
    pub name: String,
    pub duration_minutes: i32,
    pub price_minor: i64,
    #[serde(default)]
    pub requires_deposit: bool,
}

// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if body.duration_minutes < 1 {
        return Err(AppError::Validation(
            "duration must be at least one minute".to_string(),
        ));
    }
    if body.price_minor < 0 {
        return Err(AppError::Validation("price must not be negative".to_string()));
    }

    let service = Service {
        id: Uuid::new_v4().to_string(),
        business_id: body.business_id,
        name: body.name,
        duration_minutes: body.duration_minutes,
        price_minor: body.price_minor,
        requires_deposit: body.requires_deposit,
        created_at: Utc::now().naive_utc(),
    };
    state.store.create_service(&service)?;

    Ok(Json(serde_json::json!({ "id": service.id })))
}

// ── Policies ──

#[derive(Deserialize, Serialize)]
pub struct PolicyBody {
    pub kind: String,
    pub enabled: bool,
    pub fee_type: String,
    pub fee_amount: i64,
    #[serde(default)]
    pub window_hours: i64,
    #[serde(default)]
    pub free_reschedules: i64,
}

#[derive(Deserialize)]
pub struct UpsertPoliciesBody {
    pub business_id: String,
    pub policies: Vec<PolicyBody>,
}

// POST /api/admin/policies
pub async fn upsert_policies(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpsertPoliciesBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    for entry in &body.policies {
        let kind = PolicyKind::parse(&entry.kind)
            .ok_or_else(|| AppError::Validation(format!("unknown policy kind: {}", entry.kind)))?;
        let policy = Policy {
            kind,
            enabled: entry.enabled,
            fee_type: FeeType::parse(&entry.fee_type),
            fee_amount: entry.fee_amount,
            window_hours: entry.window_hours,
            free_reschedules: entry.free_reschedules,
        };
        state.store.upsert_policy(&body.business_id, &policy)?;
    }

    Ok(Json(serde_json::json!({ "updated": body.policies.len() })))
}

#[derive(Deserialize)]
pub struct BusinessQuery {
    pub business_id: String,
}

// GET /api/admin/policies?business_id=..
pub async fn get_policies(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BusinessQuery>,
) -> Result<Json<Vec<PolicyBody>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let policies = state.store.get_policies(&query.business_id)?;
    Ok(Json(
        policies
            .into_iter()
            .map(|p| PolicyBody {
                kind: p.kind.as_str().to_string(),
                enabled: p.enabled,
                fee_type: p.fee_type.as_str().to_string(),
                fee_amount: p.fee_amount,
                window_hours: p.window_hours,
                free_reschedules: p.free_reschedules,
            })
            .collect(),
    ))
}

// ── Blocked time ──

#[derive(Deserialize)]
pub struct BlockTimeBody {
    pub business_id: String,
    pub start_at: String,
    pub end_at: String,
    pub reason: Option<String>,
}

// POST /api/admin/blocked-times
pub async fn add_blocked_time(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BlockTimeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let start_at = parse_start(&body.start_at)?;
    let end_at = parse_start(&body.end_at)?;
    if end_at <= start_at {
        return Err(AppError::Validation("end must be after start".to_string()));
    }

    let blocked = BlockedTime {
        id: Uuid::new_v4().to_string(),
        business_id: body.business_id,
        start_at,
        end_at,
        reason: body.reason,
    };
    state.store.add_blocked_time(&blocked)?;

    Ok(Json(serde_json::json!({ "id": blocked.id })))
}

// POST /api/admin/blocked-times/:id/remove
pub async fn remove_blocked_time(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let removed = state.store.remove_blocked_time(&id)?;
    if !removed {
        return Err(AppError::NotFound(format!("blocked time {id}")));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}

// ── Bookings (business side) ──

#[derive(Deserialize)]
pub struct BookingsQuery {
    pub business_id: String,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/admin/bookings
pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<AppointmentResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50);
    let appointments = state.store.get_appointments_for_business(
        &query.business_id,
        query.status.as_deref(),
        limit,
    )?;

    Ok(Json(
        appointments
            .iter()
            .map(AppointmentResponse::from_appointment)
            .collect(),
    ))
}

// POST /api/admin/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = booking::cancel_booking(
        &state,
        &id,
        CancelReason::BusinessRequest,
        Utc::now().naive_utc(),
    )
    .await?;
    Ok(Json(LifecycleResponse::from_outcome(&outcome)))
}

// POST /api/admin/bookings/:id/no-show
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = booking::mark_no_show(&state, &id, Utc::now().naive_utc()).await?;
    Ok(Json(LifecycleResponse::from_outcome(&outcome)))
}

// POST /api/admin/bookings/:id/complete
pub async fn mark_completed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = booking::mark_completed(&state, &id, Utc::now().naive_utc()).await?;
    Ok(Json(LifecycleResponse::from_outcome(&outcome)))
}

// ── Dashboard & reconciliation ──

#[derive(Serialize)]
pub struct StatusResponse {
    upcoming_confirmed_count: i64,
    uncollected_fee_total_minor: i64,
    appointments_today: i64,
}

// GET /api/admin/status?business_id=..
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BusinessQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let stats = state
        .store
        .get_dashboard_stats(&query.business_id, &Utc::now().naive_utc())?;

    Ok(Json(StatusResponse {
        upcoming_confirmed_count: stats.upcoming_confirmed_count,
        uncollected_fee_total_minor: stats.uncollected_fee_total_minor,
        appointments_today: stats.appointments_today,
    }))
}

#[derive(Serialize)]
pub struct FeeResponse {
    id: String,
    appointment_id: String,
    reason: String,
    amount_minor: i64,
    collected: bool,
    applied_at: String,
}

// POST /api/admin/fees/:id/refund
pub async fn refund_fee(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<FeeResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let refund = booking::refund_fee(&state, &id).await?;
    Ok(Json(FeeResponse {
        id: refund.id,
        appointment_id: refund.appointment_id,
        reason: refund.reason.as_str().to_string(),
        amount_minor: refund.amount_minor,
        collected: refund.collected,
        applied_at: refund.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}

// GET /api/admin/fees?business_id=..  (uncollected entries for retry)
pub async fn get_uncollected_fees(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BusinessQuery>,
) -> Result<Json<Vec<FeeResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let fees = state.store.get_uncollected_fees(&query.business_id)?;
    Ok(Json(
        fees.into_iter()
            .map(|f| FeeResponse {
                id: f.id,
                appointment_id: f.appointment_id,
                reason: f.reason.as_str().to_string(),
                amount_minor: f.amount_minor,
                collected: f.collected,
                applied_at: f.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect(),
    ))
}
