use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use crate::db::store::AppointmentStore;
use crate::models::{Appointment, Reminder};
use crate::services::notifications::{NotificationProvider, ReminderPayload};

/// Reminder lead times before the appointment start.
const REMINDER_OFFSETS_HOURS: [i64; 2] = [24, 1];

/// Register the 24h and 1h reminders for a freshly confirmed appointment.
/// Fire-and-forget: dispatch failures are logged, never surfaced, and a
/// reminder whose send time is already past is skipped.
pub async fn register_reminders(
    store: &dyn AppointmentStore,
    notifier: &dyn NotificationProvider,
    appointment: &Appointment,
    business_name: &str,
    now: NaiveDateTime,
) {
    let payload = ReminderPayload {
        appointment_id: appointment.id.clone(),
        client_id: appointment.client_id.clone(),
        business_name: business_name.to_string(),
        service_name: appointment.service.name.clone(),
        start_at: appointment.start_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    };

    for offset_hours in REMINDER_OFFSETS_HOURS {
        let send_at = appointment.start_at - Duration::hours(offset_hours);
        if send_at <= now {
            continue;
        }

        match notifier.schedule(send_at, &payload).await {
            Ok(provider_ref) => {
                let reminder = Reminder {
                    id: Uuid::new_v4().to_string(),
                    appointment_id: appointment.id.clone(),
                    provider_ref,
                    send_at,
                };
                if let Err(e) = store.insert_reminder(&reminder) {
                    tracing::warn!(
                        appointment_id = %appointment.id,
                        "failed to record scheduled reminder: {e}"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    appointment_id = %appointment.id,
                    "failed to schedule {offset_hours}h reminder: {e}"
                );
            }
        }
    }
}

/// Cancel any still-pending reminders for an appointment. Idempotent: the
/// dispatcher treats unknown or already-fired reminders as a no-op, and a
/// second call here finds nothing to cancel.
pub async fn cancel_reminders(
    store: &dyn AppointmentStore,
    notifier: &dyn NotificationProvider,
    appointment_id: &str,
) {
    let reminders = match store.get_reminders_for_appointment(appointment_id) {
        Ok(reminders) => reminders,
        Err(e) => {
            tracing::warn!(appointment_id, "failed to load reminders for cancellation: {e}");
            return;
        }
    };

    for reminder in &reminders {
        if let Err(e) = notifier.cancel(&reminder.provider_ref).await {
            tracing::warn!(
                appointment_id,
                reminder_ref = %reminder.provider_ref,
                "failed to cancel reminder: {e}"
            );
        }
    }

    if let Err(e) = store.delete_reminders_for_appointment(appointment_id) {
        tracing::warn!(appointment_id, "failed to clear reminder records: {e}");
    }
}
