use chrono::{Duration, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Appointment, AppointmentStatus, Business, CancelReason, FeeEntry, FeeReason, PolicySnapshot,
    Service,
};
use crate::services::policy::{self, DecisionReason, LifecycleRequest};
use crate::services::reminders;
use crate::state::AppState;

pub struct CreateBookingRequest {
    pub business_id: String,
    pub client_id: String,
    pub service_id: String,
    pub start_at: NaiveDateTime,
}

/// Result of a lifecycle action, with enough detail for the presentation
/// layer to explain what happened ("cancelled, $25 late fee applied").
pub struct LifecycleOutcome {
    pub appointment: Appointment,
    pub fee_minor: i64,
    pub fee_collected: bool,
    pub reason: DecisionReason,
}

/// Book a slot: re-validate it, reserve it atomically as `pending`, authorize
/// any required deposit, and confirm. Deposit authorization is the one
/// blocking payment call in the system; if it fails the hold is released and
/// the booking never confirms.
pub async fn create_booking(
    state: &AppState,
    request: CreateBookingRequest,
    now: NaiveDateTime,
) -> Result<Appointment, AppError> {
    let business = load_business(state, &request.business_id)?;
    let service = state
        .store
        .get_service(&request.service_id)?
        .ok_or_else(|| AppError::NotFound(format!("service {}", request.service_id)))?;
    if service.business_id != business.id {
        return Err(AppError::Validation(
            "service does not belong to this business".to_string(),
        ));
    }

    validate_slot(state, &business, &service, request.start_at, now)?;

    admit(
        state,
        &business,
        &service,
        &request.client_id,
        request.start_at,
        now,
        0,
        None,
    )
    .await
}

/// Cancel a confirmed appointment. The state transition always commits
/// first; fee capture is non-blocking and a billing failure leaves the
/// ledger entry uncollected rather than undoing the cancellation.
pub async fn cancel_booking(
    state: &AppState,
    appointment_id: &str,
    actor: CancelReason,
    now: NaiveDateTime,
) -> Result<LifecycleOutcome, AppError> {
    let appointment = load_confirmed(state, appointment_id, "cancelled")?;

    let decision = policy::evaluate(&appointment, LifecycleRequest::Cancel, now);

    commit_transition(
        state,
        &appointment,
        AppointmentStatus::Cancelled,
        Some(actor),
        "cancelled",
    )?;
    tracing::info!(appointment_id, reason = decision.reason.as_str(), "appointment cancelled");

    reminders::cancel_reminders(state.store.as_ref(), state.notifier.as_ref(), appointment_id)
        .await;
    settle_deposit_on_exit(state, &appointment, true).await?;

    let (fee_minor, fee_collected) = match fee_reason_for(decision.reason) {
        Some(reason) if decision.fee_minor > 0 => {
            let collected = apply_fee(state, &appointment, reason, decision.fee_minor).await?;
            (decision.fee_minor, collected)
        }
        _ => (0, true),
    };

    Ok(LifecycleOutcome {
        appointment: reload(state, appointment_id)?,
        fee_minor,
        fee_collected,
        reason: decision.reason,
    })
}

/// Move a confirmed appointment to a new slot. The old appointment becomes
/// terminal (`rescheduled`) and a replacement is admitted as a fresh booking
/// carrying the incremented reschedule count and a back-reference. Outside
/// the reschedule window the request is refused outright.
pub async fn reschedule_booking(
    state: &AppState,
    appointment_id: &str,
    new_start: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<LifecycleOutcome, AppError> {
    let appointment = load_confirmed(state, appointment_id, "rescheduled")?;

    let decision = policy::evaluate(&appointment, LifecycleRequest::Reschedule, now);
    if !decision.allowed {
        return Err(AppError::RescheduleWindowViolation);
    }

    let business = load_business(state, &appointment.business_id)?;
    let service = state
        .store
        .get_service(&appointment.service.service_id)?
        .ok_or_else(|| AppError::Validation("service is no longer offered".to_string()))?;

    validate_slot(state, &business, &service, new_start, now)?;

    // The replacement is a fresh booking, including deposit evaluation.
    let replacement = admit(
        state,
        &business,
        &service,
        &appointment.client_id,
        new_start,
        now,
        appointment.reschedule_count + 1,
        Some(appointment.id.clone()),
    )
    .await?;

    let moved = state.store.transition_status(
        appointment_id,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Rescheduled,
        None,
    )?;
    if !moved {
        // Lost the race on the old appointment: unwind the replacement.
        let _ = state.store.transition_status(
            &replacement.id,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            None,
        );
        reminders::cancel_reminders(
            state.store.as_ref(),
            state.notifier.as_ref(),
            &replacement.id,
        )
        .await;
        settle_deposit_on_exit(state, &replacement, false).await?;
        let current = reload(state, appointment_id)?;
        return Err(AppError::InvalidTransition {
            status: current.status.as_str(),
            requested: "rescheduled",
        });
    }
    tracing::info!(
        appointment_id,
        replacement_id = %replacement.id,
        "appointment rescheduled"
    );

    reminders::cancel_reminders(state.store.as_ref(), state.notifier.as_ref(), appointment_id)
        .await;
    // Rescheduling releases the old hold; forfeiture only applies to
    // cancellations and no-shows.
    settle_deposit_on_exit(state, &appointment, false).await?;

    let (fee_minor, fee_collected) = if decision.fee_minor > 0 {
        let collected = apply_fee(
            state,
            &appointment,
            FeeReason::RescheduleFee,
            decision.fee_minor,
        )
        .await?;
        (decision.fee_minor, collected)
    } else {
        (0, true)
    };

    Ok(LifecycleOutcome {
        appointment: reload(state, &replacement.id)?,
        fee_minor,
        fee_collected,
        reason: decision.reason,
    })
}

/// Business marks a client as absent. Only meaningful once the start time
/// has passed.
pub async fn mark_no_show(
    state: &AppState,
    appointment_id: &str,
    now: NaiveDateTime,
) -> Result<LifecycleOutcome, AppError> {
    let appointment = load_confirmed(state, appointment_id, "no_show")?;

    if now <= appointment.start_at {
        return Err(AppError::Validation(
            "appointment has not started yet".to_string(),
        ));
    }

    let decision = policy::evaluate(&appointment, LifecycleRequest::NoShow, now);

    commit_transition(state, &appointment, AppointmentStatus::NoShow, None, "no_show")?;
    tracing::info!(appointment_id, fee_minor = decision.fee_minor, "appointment marked no-show");

    reminders::cancel_reminders(state.store.as_ref(), state.notifier.as_ref(), appointment_id)
        .await;
    settle_deposit_on_exit(state, &appointment, true).await?;

    let (fee_minor, fee_collected) = if decision.fee_minor > 0 {
        let collected =
            apply_fee(state, &appointment, FeeReason::NoShow, decision.fee_minor).await?;
        (decision.fee_minor, collected)
    } else {
        (0, true)
    };

    Ok(LifecycleOutcome {
        appointment: reload(state, appointment_id)?,
        fee_minor,
        fee_collected,
        reason: decision.reason,
    })
}

/// Business closes out a finished appointment. This is where the full
/// service price is captured: the deposit hold first, then the remainder.
pub async fn mark_completed(
    state: &AppState,
    appointment_id: &str,
    now: NaiveDateTime,
) -> Result<LifecycleOutcome, AppError> {
    let appointment = load_confirmed(state, appointment_id, "completed")?;

    if now < appointment.start_at {
        return Err(AppError::Validation(
            "appointment has not started yet".to_string(),
        ));
    }

    commit_transition(state, &appointment, AppointmentStatus::Completed, None, "completed")?;

    reminders::cancel_reminders(state.store.as_ref(), state.notifier.as_ref(), appointment_id)
        .await;

    let (fee_minor, fee_collected) = capture_service_payment(state, &appointment).await?;
    tracing::info!(appointment_id, amount_minor = fee_minor, collected = fee_collected, "appointment completed");

    Ok(LifecycleOutcome {
        appointment: reload(state, appointment_id)?,
        fee_minor,
        fee_collected,
        reason: DecisionReason::NoFee,
    })
}

/// Reverse a collected fee (goodwill, dispute resolution). The ledger is
/// append-only: the reversal is a new `refund` entry with a negative amount.
/// Each fee can be refunded once.
pub async fn refund_fee(state: &AppState, fee_id: &str) -> Result<FeeEntry, AppError> {
    let fee = state
        .store
        .get_fee(fee_id)?
        .ok_or_else(|| AppError::NotFound(format!("fee {fee_id}")))?;

    // The refund entry id is derived from the original, so a second attempt
    // finds it and stops.
    let refund_id = format!("{fee_id}:refund");
    if state.store.get_fee(&refund_id)?.is_some() {
        return Err(AppError::Validation("fee has already been refunded".to_string()));
    }

    if fee.amount_minor <= 0 {
        return Err(AppError::Validation("fee is not refundable".to_string()));
    }
    let receipt_id = match (fee.collected, fee.receipt_id.as_deref()) {
        (true, Some(receipt_id)) => receipt_id,
        _ => {
            return Err(AppError::Validation(
                "fee was never collected, nothing to refund".to_string(),
            ))
        }
    };

    let key = format!("{}:refund:{fee_id}", fee.appointment_id);
    let refund_receipt = state
        .payments
        .refund(receipt_id, fee.amount_minor, &key)
        .await?;

    let refund = FeeEntry {
        id: refund_id,
        appointment_id: fee.appointment_id.clone(),
        reason: FeeReason::Refund,
        amount_minor: -fee.amount_minor,
        collected: true,
        receipt_id: Some(refund_receipt),
        applied_at: Utc::now().naive_utc(),
    };
    state.store.append_fee(&refund)?;
    tracing::info!(fee_id, appointment_id = %fee.appointment_id, amount_minor = fee.amount_minor, "fee refunded");

    Ok(refund)
}

// ── Internals ──

fn load_business(state: &AppState, business_id: &str) -> Result<Business, AppError> {
    let business = state
        .store
        .get_business(business_id)?
        .ok_or_else(|| AppError::NotFound(format!("business {business_id}")))?;
    if !business.active {
        return Err(AppError::Validation(
            "business is not accepting bookings".to_string(),
        ));
    }
    Ok(business)
}

fn load_confirmed(
    state: &AppState,
    appointment_id: &str,
    requested: &'static str,
) -> Result<Appointment, AppError> {
    let appointment = state
        .store
        .get_appointment(appointment_id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
    if appointment.status != AppointmentStatus::Confirmed {
        return Err(AppError::InvalidTransition {
            status: appointment.status.as_str(),
            requested,
        });
    }
    Ok(appointment)
}

fn reload(state: &AppState, appointment_id: &str) -> Result<Appointment, AppError> {
    state
        .store
        .get_appointment(appointment_id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))
}

/// Conditional write against the expected `confirmed` state; losing the race
/// surfaces as `InvalidTransition` with the status that won.
fn commit_transition(
    state: &AppState,
    appointment: &Appointment,
    next: AppointmentStatus,
    cancel_reason: Option<CancelReason>,
    requested: &'static str,
) -> Result<(), AppError> {
    let moved = state.store.transition_status(
        &appointment.id,
        AppointmentStatus::Confirmed,
        next,
        cancel_reason,
    )?;
    if !moved {
        let current = reload(state, &appointment.id)?;
        return Err(AppError::InvalidTransition {
            status: current.status.as_str(),
            requested,
        });
    }
    Ok(())
}

fn validate_slot(
    state: &AppState,
    business: &Business,
    service: &Service,
    start_at: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    if start_at <= now {
        return Err(AppError::Validation(
            "appointment start must be in the future".to_string(),
        ));
    }
    if start_at.date() > now.date() + Duration::days(state.config.booking_horizon_days) {
        return Err(AppError::OutOfRange);
    }

    let end_at = start_at + Duration::minutes(service.duration_minutes as i64);

    // A business with no configured hours lists no open slots, so it
    // accepts no bookings either.
    let fits = business
        .working_hours
        .intervals_on(start_at.date())
        .iter()
        .any(|(open, close)| *open <= start_at && end_at <= *close);
    if !fits {
        return Err(AppError::Validation(format!(
            "outside working hours ({})",
            business.working_hours.to_human_readable()
        )));
    }

    let blocked = state
        .store
        .get_blocked_times_in_range(&business.id, &start_at, &end_at)?;
    if !blocked.is_empty() {
        return Err(AppError::SlotNoLongerAvailable);
    }

    Ok(())
}

/// Reserve the slot as `pending`, settle the deposit, and confirm. Shared by
/// first bookings and reschedule replacements.
#[allow(clippy::too_many_arguments)]
async fn admit(
    state: &AppState,
    business: &Business,
    service: &Service,
    client_id: &str,
    start_at: NaiveDateTime,
    now: NaiveDateTime,
    reschedule_count: i32,
    rescheduled_from: Option<String>,
) -> Result<Appointment, AppError> {
    let policies = PolicySnapshot::from_policies(
        &state.store.get_policies(&business.id)?,
        business.deposit_forfeit_on_cancel,
    );
    let created_at = Utc::now().naive_utc();

    let mut appointment = Appointment {
        id: Uuid::new_v4().to_string(),
        business_id: business.id.clone(),
        client_id: client_id.to_string(),
        service: service.snapshot(),
        start_at,
        status: AppointmentStatus::Pending,
        cancel_reason: None,
        policies,
        reschedule_count,
        rescheduled_from,
        deposit_authorization_id: None,
        deposit_captured: false,
        created_at,
        updated_at: created_at,
    };

    if !state.store.reserve_pending(&appointment)? {
        return Err(AppError::SlotNoLongerAvailable);
    }

    if let Some(deposit_minor) = policy::deposit_due(&appointment.policies, &appointment.service) {
        let key = format!("{}:deposit:0", appointment.id);
        match state
            .payments
            .authorize(client_id, deposit_minor, &key)
            .await
        {
            Ok(authorization_id) => {
                state
                    .store
                    .set_deposit_authorization(&appointment.id, &authorization_id)?;
                appointment.deposit_authorization_id = Some(authorization_id);
            }
            Err(e) => {
                tracing::warn!(
                    appointment_id = %appointment.id,
                    "deposit authorization failed, releasing hold: {e}"
                );
                state.store.transition_status(
                    &appointment.id,
                    AppointmentStatus::Pending,
                    AppointmentStatus::Cancelled,
                    Some(CancelReason::PaymentFailed),
                )?;
                return Err(AppError::PaymentAuthorizationFailed);
            }
        }
    }

    let confirmed = state.store.transition_status(
        &appointment.id,
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        None,
    )?;
    if !confirmed {
        // The storage backstop refused the confirm; free the hold.
        let _ = state.store.transition_status(
            &appointment.id,
            AppointmentStatus::Pending,
            AppointmentStatus::Cancelled,
            None,
        );
        if let Some(authorization_id) = &appointment.deposit_authorization_id {
            if let Err(e) = state.payments.release(authorization_id).await {
                tracing::warn!(appointment_id = %appointment.id, "failed to release deposit: {e}");
            }
        }
        return Err(AppError::SlotNoLongerAvailable);
    }
    tracing::info!(
        appointment_id = %appointment.id,
        business_id = %business.id,
        start_at = %start_at,
        "appointment confirmed"
    );

    reminders::register_reminders(
        state.store.as_ref(),
        state.notifier.as_ref(),
        &appointment,
        &business.name,
        now,
    )
    .await;

    reload(state, &appointment.id)
}

fn fee_reason_for(reason: DecisionReason) -> Option<FeeReason> {
    match reason {
        DecisionReason::NoShowFee => Some(FeeReason::NoShow),
        DecisionReason::LateCancellationFee => Some(FeeReason::LateCancellation),
        DecisionReason::RescheduleFee => Some(FeeReason::RescheduleFee),
        _ => None,
    }
}

/// Record a fee in the ledger, then try to collect it. Collection failure is
/// non-fatal: the entry stays uncollected for async retry.
async fn apply_fee(
    state: &AppState,
    appointment: &Appointment,
    reason: FeeReason,
    amount_minor: i64,
) -> Result<bool, AppError> {
    let fee = FeeEntry {
        id: Uuid::new_v4().to_string(),
        appointment_id: appointment.id.clone(),
        reason,
        amount_minor,
        collected: false,
        receipt_id: None,
        applied_at: Utc::now().naive_utc(),
    };
    state.store.append_fee(&fee)?;

    let key = format!("{}:{}:{}", appointment.id, reason.as_str(), fee.id);
    match charge(state, &appointment.client_id, amount_minor, &key).await {
        Ok(receipt_id) => {
            state.store.mark_fee_collected(&fee.id, &receipt_id)?;
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                appointment_id = %appointment.id,
                reason = reason.as_str(),
                amount_minor,
                "fee left uncollected: {e}"
            );
            Ok(false)
        }
    }
}

async fn charge(
    state: &AppState,
    client_id: &str,
    amount_minor: i64,
    key: &str,
) -> anyhow::Result<String> {
    let authorization_id = state
        .payments
        .authorize(client_id, amount_minor, &format!("{key}:auth"))
        .await?;
    state
        .payments
        .capture(&authorization_id, amount_minor, &format!("{key}:capture"))
        .await
}

/// Resolve an outstanding deposit hold when an appointment exits early.
/// `forfeitable` is true for cancellations and no-shows, where the business
/// configuration decides between keeping and releasing the deposit.
async fn settle_deposit_on_exit(
    state: &AppState,
    appointment: &Appointment,
    forfeitable: bool,
) -> Result<(), AppError> {
    let Some(authorization_id) = &appointment.deposit_authorization_id else {
        return Ok(());
    };
    if appointment.deposit_captured {
        return Ok(());
    }

    let deposit_minor = policy::deposit_due(&appointment.policies, &appointment.service);
    if forfeitable && appointment.policies.deposit_forfeit_on_cancel {
        if let Some(amount_minor) = deposit_minor {
            let fee = FeeEntry {
                id: Uuid::new_v4().to_string(),
                appointment_id: appointment.id.clone(),
                reason: FeeReason::DepositForfeit,
                amount_minor,
                collected: false,
                receipt_id: None,
                applied_at: Utc::now().naive_utc(),
            };
            state.store.append_fee(&fee)?;
            let key = format!("{}:deposit_forfeit:{}", appointment.id, fee.id);
            match state
                .payments
                .capture(authorization_id, amount_minor, &key)
                .await
            {
                Ok(receipt_id) => {
                    state.store.mark_fee_collected(&fee.id, &receipt_id)?;
                    state.store.mark_deposit_captured(&appointment.id)?;
                }
                Err(e) => {
                    tracing::warn!(
                        appointment_id = %appointment.id,
                        "deposit forfeiture left uncollected: {e}"
                    );
                }
            }
            return Ok(());
        }
    }

    if let Err(e) = state.payments.release(authorization_id).await {
        tracing::warn!(appointment_id = %appointment.id, "failed to release deposit: {e}");
    }
    Ok(())
}

/// Capture the full service price after completion: the deposit hold first,
/// then the remainder as a fresh charge.
async fn capture_service_payment(
    state: &AppState,
    appointment: &Appointment,
) -> Result<(i64, bool), AppError> {
    let price_minor = appointment.service.price_minor;
    if price_minor == 0 {
        return Ok((0, true));
    }

    let fee = FeeEntry {
        id: Uuid::new_v4().to_string(),
        appointment_id: appointment.id.clone(),
        reason: FeeReason::ServicePayment,
        amount_minor: price_minor,
        collected: false,
        receipt_id: None,
        applied_at: Utc::now().naive_utc(),
    };
    state.store.append_fee(&fee)?;

    let deposit = appointment
        .deposit_authorization_id
        .as_ref()
        .filter(|_| !appointment.deposit_captured)
        .and_then(|authorization_id| {
            policy::deposit_due(&appointment.policies, &appointment.service)
                .map(|amount| (authorization_id.clone(), amount))
        });

    let key = format!("{}:service_payment:{}", appointment.id, fee.id);
    let result: anyhow::Result<String> = async {
        let mut remainder = price_minor;
        let mut receipt_id = String::new();
        if let Some((authorization_id, deposit_minor)) = &deposit {
            receipt_id = state
                .payments
                .capture(authorization_id, *deposit_minor, &format!("{key}:deposit"))
                .await?;
            remainder -= deposit_minor;
        }
        if remainder > 0 {
            receipt_id = charge(state, &appointment.client_id, remainder, &key).await?;
        }
        Ok(receipt_id)
    }
    .await;

    match result {
        Ok(receipt_id) => {
            if deposit.is_some() {
                state.store.mark_deposit_captured(&appointment.id)?;
            }
            state.store.mark_fee_collected(&fee.id, &receipt_id)?;
            Ok((price_minor, true))
        }
        Err(e) => {
            tracing::warn!(
                appointment_id = %appointment.id,
                "service payment left uncollected: {e}"
            );
            Ok((price_minor, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::store::{AppointmentStore, SqliteStore};
    use crate::models::{FeeType, Policy, PolicyKind, WorkingHours};
    use crate::services::notifications::{NotificationProvider, ReminderPayload};
    use crate::services::payments::PaymentProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn all_week_hours() -> WorkingHours {
        let hours = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
            .iter()
            .map(|day| format!(r#"{{"day":"{day}","open":"00:00","close":"23:59"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        WorkingHours::from_json(&format!(r#"{{"hours":[{hours}]}}"#)).unwrap()
    }

    #[derive(Default)]
    struct MockPayments {
        fail_authorize: AtomicBool,
        fail_capture: AtomicBool,
        authorized: Mutex<Vec<i64>>,
        captured: Mutex<Vec<i64>>,
        released: Mutex<Vec<String>>,
        refunded: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl PaymentProvider for MockPayments {
        async fn authorize(
            &self,
            _client_id: &str,
            amount_minor: i64,
            _idempotency_key: &str,
        ) -> anyhow::Result<String> {
            if self.fail_authorize.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("card declined"));
            }
            self.authorized.lock().unwrap().push(amount_minor);
            Ok(format!("auth-{amount_minor}"))
        }

        async fn capture(
            &self,
            authorization_id: &str,
            amount_minor: i64,
            _idempotency_key: &str,
        ) -> anyhow::Result<String> {
            if self.fail_capture.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("capture timed out"));
            }
            self.captured.lock().unwrap().push(amount_minor);
            Ok(format!("receipt-{authorization_id}-{amount_minor}"))
        }

        async fn refund(
            &self,
            _receipt_id: &str,
            amount_minor: i64,
            _idempotency_key: &str,
        ) -> anyhow::Result<String> {
            self.refunded.lock().unwrap().push(amount_minor);
            Ok(format!("refund-{amount_minor}"))
        }

        async fn release(&self, authorization_id: &str) -> anyhow::Result<()> {
            self.released.lock().unwrap().push(authorization_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        next_ref: AtomicUsize,
        scheduled: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationProvider for MockNotifier {
        async fn schedule(
            &self,
            _send_at: NaiveDateTime,
            payload: &ReminderPayload,
        ) -> anyhow::Result<String> {
            let id = self.next_ref.fetch_add(1, Ordering::SeqCst);
            self.scheduled.lock().unwrap().push(payload.appointment_id.clone());
            Ok(format!("rem-{id}"))
        }

        async fn cancel(&self, reminder_ref: &str) -> anyhow::Result<()> {
            // Idempotent no-op even for unknown refs.
            self.cancelled.lock().unwrap().push(reminder_ref.to_string());
            Ok(())
        }
    }

    struct Harness {
        state: AppState,
        payments: Arc<MockPayments>,
        notifier: Arc<MockNotifier>,
    }

    fn test_config() -> AppConfig {
        AppConfig {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "test-token".to_string(),
            booking_horizon_days: 90,
            slot_granularity_minutes: 30,
            stripe_secret_key: String::new(),
            notify_url: String::new(),
            notify_token: String::new(),
        }
    }

    fn harness(policies: &[Policy], requires_deposit: bool, forfeit: bool) -> Harness {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let payments = Arc::new(MockPayments::default());
        let notifier = Arc::new(MockNotifier::default());

        let created = dt("2025-12-01 08:00");
        store
            .create_business(&Business {
                id: "biz-1".to_string(),
                name: "Glow Studio".to_string(),
                timezone: "UTC".to_string(),
                working_hours: all_week_hours(),
                deposit_forfeit_on_cancel: forfeit,
                active: true,
                created_at: created,
            })
            .unwrap();
        store
            .create_service(&crate::models::Service {
                id: "svc-1".to_string(),
                business_id: "biz-1".to_string(),
                name: "Haircut".to_string(),
                duration_minutes: 60,
                price_minor: 10_000,
                requires_deposit,
                created_at: created,
            })
            .unwrap();
        for policy in policies {
            store.upsert_policy("biz-1", policy).unwrap();
        }

        Harness {
            state: AppState {
                store,
                payments: payments.clone(),
                notifier: notifier.clone(),
                config: test_config(),
            },
            payments,
            notifier,
        }
    }

    fn policy(kind: PolicyKind, fee_amount: i64, window_hours: i64, free_reschedules: i64) -> Policy {
        Policy {
            kind,
            enabled: true,
            fee_type: FeeType::Fixed,
            fee_amount,
            window_hours,
            free_reschedules,
        }
    }

    fn booking_request(start: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            business_id: "biz-1".to_string(),
            client_id: "client-1".to_string(),
            service_id: "svc-1".to_string(),
            start_at: dt(start),
        }
    }

    const NOW: &str = "2025-12-10 09:00";

    #[tokio::test]
    async fn test_create_booking_confirms_and_schedules_reminders() {
        let h = harness(&[], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        assert_eq!(appt.end_at(), dt("2025-12-18 15:00"));
        assert_eq!(h.notifier.scheduled.lock().unwrap().len(), 2);
        assert_eq!(
            h.state
                .store
                .get_reminders_for_appointment(&appt.id)
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_same_slot_cannot_be_booked_twice() {
        let h = harness(&[], false, false);
        let first = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        assert_eq!(first.status, AppointmentStatus::Confirmed);

        let second = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW)).await;
        assert!(matches!(second, Err(AppError::SlotNoLongerAvailable)));

        // Overlapping, not just identical, starts are refused too.
        let overlap = create_booking(&h.state, booking_request("2025-12-18 14:30"), dt(NOW)).await;
        assert!(matches!(overlap, Err(AppError::SlotNoLongerAvailable)));
    }

    #[tokio::test]
    async fn test_business_without_hours_refuses_bookings() {
        let h = harness(&[], false, false);
        let created = dt("2025-12-01 08:00");
        h.state
            .store
            .create_business(&Business {
                id: "biz-2".to_string(),
                name: "Pop-up Stand".to_string(),
                timezone: "UTC".to_string(),
                working_hours: WorkingHours::from_json(r#"{"hours":[]}"#).unwrap(),
                deposit_forfeit_on_cancel: false,
                active: true,
                created_at: created,
            })
            .unwrap();
        h.state
            .store
            .create_service(&crate::models::Service {
                id: "svc-2".to_string(),
                business_id: "biz-2".to_string(),
                name: "Braids".to_string(),
                duration_minutes: 60,
                price_minor: 5_000,
                requires_deposit: false,
                created_at: created,
            })
            .unwrap();

        // No configured hours means no open slots, so admission refuses too.
        let result = create_booking(
            &h.state,
            CreateBookingRequest {
                business_id: "biz-2".to_string(),
                client_id: "client-1".to_string(),
                service_id: "svc-2".to_string(),
                start_at: dt("2025-12-18 14:00"),
            },
            dt(NOW),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_booking_in_past_rejected() {
        let h = harness(&[], false, false);
        let result = create_booking(&h.state, booking_request("2025-12-09 14:00"), dt(NOW)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_booking_past_horizon_rejected() {
        let h = harness(&[], false, false);
        let result = create_booking(&h.state, booking_request("2026-06-18 14:00"), dt(NOW)).await;
        assert!(matches!(result, Err(AppError::OutOfRange)));
    }

    #[tokio::test]
    async fn test_deposit_authorized_at_booking() {
        let h = harness(&[policy(PolicyKind::Deposit, 2000, 0, 0)], true, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        assert!(appt.deposit_authorization_id.is_some());
        assert_eq!(*h.payments.authorized.lock().unwrap(), vec![2000]);
        // authorization only, nothing captured yet
        assert!(h.payments.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_deposit_authorization_frees_the_slot() {
        let h = harness(&[policy(PolicyKind::Deposit, 2000, 0, 0)], true, false);
        h.payments.fail_authorize.store(true, Ordering::SeqCst);

        let result = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW)).await;
        assert!(matches!(result, Err(AppError::PaymentAuthorizationFailed)));

        // The failed attempt is cancelled with payment_failed and the slot
        // can be booked by someone else.
        h.payments.fail_authorize.store(false, Ordering::SeqCst);
        let retry = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        assert_eq!(retry.status, AppointmentStatus::Confirmed);

        let failed = h
            .state
            .store
            .get_appointments_for_business("biz-1", Some("cancelled"), 10)
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].cancel_reason, Some(CancelReason::PaymentFailed));
    }

    #[tokio::test]
    async fn test_cancel_before_window_is_free() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        // 13 hours before start
        let outcome = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-18 01:00"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
        assert_eq!(outcome.fee_minor, 0);
        assert!(h
            .state
            .store
            .get_fees_for_appointment(&appt.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cancel_inside_window_charges_and_collects() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        // 11 hours before start
        let outcome = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-18 03:00"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.fee_minor, 2500);
        assert!(outcome.fee_collected);

        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].reason, FeeReason::LateCancellation);
        assert!(fees[0].collected);
        assert_eq!(*h.payments.captured.lock().unwrap(), vec![2500]);
    }

    #[tokio::test]
    async fn test_billing_failure_does_not_block_cancellation() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        h.payments.fail_capture.store(true, Ordering::SeqCst);
        let outcome = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-18 03:00"),
        )
        .await
        .unwrap();

        // The transition stands; the fee is recorded but uncollected.
        assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
        assert!(!outcome.fee_collected);
        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        assert_eq!(fees.len(), 1);
        assert!(!fees[0].collected);
        assert_eq!(h.state.store.get_uncollected_fees("biz-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_cancels_reminders() {
        let h = harness(&[], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-11 09:00"))
            .await
            .unwrap();
        assert_eq!(h.notifier.cancelled.lock().unwrap().len(), 2);
        assert!(h
            .state
            .store
            .get_reminders_for_appointment(&appt.id)
            .unwrap()
            .is_empty());

        // Cancelling reminders again is a no-op, not an error.
        reminders::cancel_reminders(h.state.store.as_ref(), h.state.notifier.as_ref(), &appt.id)
            .await;
    }

    #[tokio::test]
    async fn test_terminal_states_reject_every_transition() {
        let h = harness(&[], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-11 09:00"))
            .await
            .unwrap();

        let cancel = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-11 10:00"),
        )
        .await;
        assert!(matches!(cancel, Err(AppError::InvalidTransition { .. })));

        let complete = mark_completed(&h.state, &appt.id, dt("2025-12-18 15:30")).await;
        assert!(matches!(complete, Err(AppError::InvalidTransition { .. })));
        // no capture was attempted for the refused completion
        assert!(h.payments.captured.lock().unwrap().is_empty());

        let no_show = mark_no_show(&h.state, &appt.id, dt("2025-12-18 15:30")).await;
        assert!(matches!(no_show, Err(AppError::InvalidTransition { .. })));

        let reschedule =
            reschedule_booking(&h.state, &appt.id, dt("2025-12-19 14:00"), dt("2025-12-11 09:00"))
                .await;
        assert!(matches!(reschedule, Err(AppError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_reschedule_lineage_and_allowance() {
        let h = harness(&[policy(PolicyKind::Rescheduling, 1500, 24, 1)], false, false);
        let original = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        // First reschedule is free.
        let first = reschedule_booking(&h.state, &original.id, dt("2025-12-19 14:00"), dt(NOW))
            .await
            .unwrap();
        assert_eq!(first.fee_minor, 0);
        assert_eq!(first.appointment.reschedule_count, 1);
        assert_eq!(first.appointment.rescheduled_from, Some(original.id.clone()));

        let old = h.state.store.get_appointment(&original.id).unwrap().unwrap();
        assert_eq!(old.status, AppointmentStatus::Rescheduled);

        // Second reschedule of the lineage pays the fee.
        let second = reschedule_booking(
            &h.state,
            &first.appointment.id,
            dt("2025-12-20 14:00"),
            dt(NOW),
        )
        .await
        .unwrap();
        assert_eq!(second.fee_minor, 1500);
        assert_eq!(second.appointment.reschedule_count, 2);

        let fees = h
            .state
            .store
            .get_fees_for_appointment(&first.appointment.id)
            .unwrap();
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].reason, FeeReason::RescheduleFee);
    }

    #[tokio::test]
    async fn test_reschedule_window_violation_keeps_original() {
        let h = harness(&[policy(PolicyKind::Rescheduling, 1500, 24, 1)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        // 12 hours before start, inside the 24h reschedule window
        let result =
            reschedule_booking(&h.state, &appt.id, dt("2025-12-19 14:00"), dt("2025-12-18 02:00"))
                .await;
        assert!(matches!(result, Err(AppError::RescheduleWindowViolation)));

        let unchanged = h.state.store.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(unchanged.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_no_show_requires_start_time_passed() {
        let h = harness(&[policy(PolicyKind::NoShow, 5000, 0, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        let early = mark_no_show(&h.state, &appt.id, dt("2025-12-18 13:00")).await;
        assert!(matches!(early, Err(AppError::Validation(_))));

        let outcome = mark_no_show(&h.state, &appt.id, dt("2025-12-18 14:15")).await.unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::NoShow);
        assert_eq!(outcome.fee_minor, 5000);
        assert!(outcome.fee_collected);
    }

    #[tokio::test]
    async fn test_cancel_after_start_charges_no_show_fee() {
        let h = harness(
            &[
                policy(PolicyKind::LateCancellation, 2500, 12, 0),
                policy(PolicyKind::NoShow, 5000, 0, 0),
            ],
            false,
            false,
        );
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        let outcome = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-18 14:30"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.fee_minor, 5000);
        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        assert_eq!(fees[0].reason, FeeReason::NoShow);
    }

    #[tokio::test]
    async fn test_completion_captures_price_minus_deposit() {
        let h = harness(&[policy(PolicyKind::Deposit, 2000, 0, 0)], true, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        let outcome = mark_completed(&h.state, &appt.id, dt("2025-12-18 15:05")).await.unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Completed);
        assert_eq!(outcome.fee_minor, 10_000);
        assert!(outcome.fee_collected);

        // 2000 deposit captured against the hold, 8000 charged fresh.
        assert_eq!(*h.payments.captured.lock().unwrap(), vec![2000, 8000]);
        assert!(outcome.appointment.deposit_captured);
    }

    #[tokio::test]
    async fn test_completion_before_start_rejected() {
        let h = harness(&[], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        let result = mark_completed(&h.state, &appt.id, dt("2025-12-18 13:00")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deposit_released_on_free_cancellation() {
        let h = harness(
            &[
                policy(PolicyKind::Deposit, 2000, 0, 0),
                policy(PolicyKind::LateCancellation, 2500, 12, 0),
            ],
            true,
            false,
        );
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-11 09:00"))
            .await
            .unwrap();
        assert_eq!(h.payments.released.lock().unwrap().len(), 1);
        assert!(h.payments.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_forfeited_when_configured() {
        let h = harness(&[policy(PolicyKind::Deposit, 2000, 0, 0)], true, true);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-11 09:00"))
            .await
            .unwrap();
        assert_eq!(*h.payments.captured.lock().unwrap(), vec![2000]);
        assert!(h.payments.released.lock().unwrap().is_empty());

        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].reason, FeeReason::DepositForfeit);
        assert!(fees[0].collected);
    }

    #[tokio::test]
    async fn test_policy_snapshot_shields_existing_bookings() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        // Business raises the fee after the booking was made.
        h.state
            .store
            .upsert_policy("biz-1", &policy(PolicyKind::LateCancellation, 9900, 12, 0))
            .unwrap();

        let outcome = cancel_booking(
            &h.state,
            &appt.id,
            CancelReason::ClientRequest,
            dt("2025-12-18 03:00"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.fee_minor, 2500);
    }

    #[tokio::test]
    async fn test_refund_reverses_collected_fee() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-18 03:00"))
            .await
            .unwrap();

        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        let fee = &fees[0];
        assert!(fee.collected);

        let refund = refund_fee(&h.state, &fee.id).await.unwrap();
        assert_eq!(refund.reason, FeeReason::Refund);
        assert_eq!(refund.amount_minor, -2500);
        assert!(refund.collected);
        assert_eq!(*h.payments.refunded.lock().unwrap(), vec![2500]);

        let fees = h.state.store.get_fees_for_appointment(&appt.id).unwrap();
        assert_eq!(fees.len(), 2);
        // The reversal never shows up in the uncollected retry list.
        assert!(h.state.store.get_uncollected_fees("biz-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_is_once_per_fee() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();
        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-18 03:00"))
            .await
            .unwrap();
        let fee_id = h.state.store.get_fees_for_appointment(&appt.id).unwrap()[0]
            .id
            .clone();

        refund_fee(&h.state, &fee_id).await.unwrap();
        let second = refund_fee(&h.state, &fee_id).await;
        assert!(matches!(second, Err(AppError::Validation(_))));
        assert_eq!(h.payments.refunded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uncollected_fee_cannot_be_refunded() {
        let h = harness(&[policy(PolicyKind::LateCancellation, 2500, 12, 0)], false, false);
        let appt = create_booking(&h.state, booking_request("2025-12-18 14:00"), dt(NOW))
            .await
            .unwrap();

        h.payments.fail_capture.store(true, Ordering::SeqCst);
        cancel_booking(&h.state, &appt.id, CancelReason::ClientRequest, dt("2025-12-18 03:00"))
            .await
            .unwrap();
        let fee_id = h.state.store.get_fees_for_appointment(&appt.id).unwrap()[0]
            .id
            .clone();

        let result = refund_fee(&h.state, &fee_id).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(h.payments.refunded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_unknown_fee_not_found() {
        let h = harness(&[], false, false);
        let result = refund_fee(&h.state, "no-such-fee").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
