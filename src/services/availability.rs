use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::db::store::AppointmentStore;
use crate::errors::AppError;
use crate::models::Slot;

/// Open slots for one service on one calendar day: working hours minus
/// confirmed appointments and blocked time, walked in fixed ticks. Pure
/// read, recomputed per call; admission is still decided atomically at
/// booking time, so the result is a hint.
pub fn open_slots(
    store: &dyn AppointmentStore,
    business_id: &str,
    service_id: &str,
    date: NaiveDate,
    now: NaiveDateTime,
    horizon_days: i64,
    granularity_minutes: i64,
) -> Result<Vec<Slot>, AppError> {
    let today = now.date();
    if date < today || date > today + Duration::days(horizon_days) {
        return Err(AppError::OutOfRange);
    }

    let business = store
        .get_business(business_id)?
        .ok_or_else(|| AppError::NotFound(format!("business {business_id}")))?;
    let service = store
        .get_service(service_id)?
        .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
    if service.business_id != business.id {
        return Err(AppError::Validation(
            "service does not belong to this business".to_string(),
        ));
    }

    let day_start = date.and_hms_opt(0, 0, 0).unwrap_or(now);
    let day_end = date.and_hms_opt(23, 59, 59).unwrap_or(now);

    let mut busy: Vec<(NaiveDateTime, NaiveDateTime)> = store
        .get_confirmed_in_range(business_id, &day_start, &day_end)?
        .iter()
        .map(|a| (a.start_at, a.end_at()))
        .collect();
    busy.extend(
        store
            .get_blocked_times_in_range(business_id, &day_start, &day_end)?
            .iter()
            .map(|b| (b.start_at, b.end_at)),
    );

    let duration = Duration::minutes(service.duration_minutes as i64);
    let tick = Duration::minutes(granularity_minutes);

    let mut slots = vec![];
    for (open, close) in business.working_hours.intervals_on(date) {
        let mut cursor = open;
        while cursor + duration <= close {
            let slot_end = cursor + duration;
            let occupied = busy
                .iter()
                .any(|(busy_start, busy_end)| *busy_start < slot_end && *busy_end > cursor);
            if !occupied {
                slots.push(Slot {
                    business_id: business_id.to_string(),
                    start_at: cursor,
                    end_at: slot_end,
                });
            }
            cursor += tick;
        }
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{AppointmentStore, SqliteStore};
    use crate::models::{
        Appointment, AppointmentStatus, BlockedTime, Business, PolicySnapshot, Service,
        WorkingHours,
    };
    use chrono::NaiveDateTime;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn setup() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        let now = dt("2025-06-01 08:00");
        store
            .create_business(&Business {
                id: "biz-1".to_string(),
                name: "Glow Studio".to_string(),
                timezone: "UTC".to_string(),
                working_hours: WorkingHours::from_json(
                    r#"{"hours":[{"day":"mon","open":"09:00","close":"17:00"}]}"#,
                )
                .unwrap(),
                deposit_forfeit_on_cancel: false,
                active: true,
                created_at: now,
            })
            .unwrap();
        store
            .create_service(&Service {
                id: "svc-1".to_string(),
                business_id: "biz-1".to_string(),
                name: "Haircut".to_string(),
                duration_minutes: 60,
                price_minor: 10_000,
                requires_deposit: false,
                created_at: now,
            })
            .unwrap();
        store
    }

    fn confirmed_appointment(store: &SqliteStore, id: &str, start: &str) {
        let service = store.get_service("svc-1").unwrap().unwrap();
        let now = dt("2025-06-01 08:00");
        let appt = Appointment {
            id: id.to_string(),
            business_id: "biz-1".to_string(),
            client_id: "client-1".to_string(),
            service: service.snapshot(),
            start_at: dt(start),
            status: AppointmentStatus::Pending,
            cancel_reason: None,
            policies: PolicySnapshot::default(),
            reschedule_count: 0,
            rescheduled_from: None,
            deposit_authorization_id: None,
            deposit_captured: false,
            created_at: now,
            updated_at: now,
        };
        assert!(store.reserve_pending(&appt).unwrap());
        assert!(store
            .transition_status(
                id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                None
            )
            .unwrap());
    }

    #[test]
    fn test_empty_day_yields_full_grid() {
        let store = setup();
        // 2025-06-16 is a Monday; 9-17 with 60min service and 30min ticks
        let slots = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-06-16 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        )
        .unwrap();
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0].start_at, dt("2025-06-16 09:00"));
        assert_eq!(slots[0].end_at, dt("2025-06-16 10:00"));
        assert_eq!(slots[14].start_at, dt("2025-06-16 16:00"));
        assert_eq!(slots[14].end_at, dt("2025-06-16 17:00"));
    }

    #[test]
    fn test_confirmed_appointment_blocks_overlapping_slots() {
        let store = setup();
        confirmed_appointment(&store, "appt-1", "2025-06-16 10:00");
        let slots = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-06-16 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        )
        .unwrap();
        // 09:30, 10:00 and 10:30 starts all overlap the 10:00-11:00 booking
        assert!(!slots.iter().any(|s| s.start_at == dt("2025-06-16 09:30")));
        assert!(!slots.iter().any(|s| s.start_at == dt("2025-06-16 10:00")));
        assert!(!slots.iter().any(|s| s.start_at == dt("2025-06-16 10:30")));
        assert!(slots.iter().any(|s| s.start_at == dt("2025-06-16 09:00")));
        assert!(slots.iter().any(|s| s.start_at == dt("2025-06-16 11:00")));
        assert_eq!(slots.len(), 12);
    }

    #[test]
    fn test_blocked_time_removes_slots() {
        let store = setup();
        store
            .add_blocked_time(&BlockedTime {
                id: "blk-1".to_string(),
                business_id: "biz-1".to_string(),
                start_at: dt("2025-06-16 12:00"),
                end_at: dt("2025-06-16 14:00"),
                reason: Some("lunch".to_string()),
            })
            .unwrap();
        let slots = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-06-16 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        )
        .unwrap();
        assert!(!slots.iter().any(|s| s.start_at == dt("2025-06-16 12:00")));
        assert!(!slots.iter().any(|s| s.start_at == dt("2025-06-16 13:30")));
        assert!(slots.iter().any(|s| s.start_at == dt("2025-06-16 11:00")));
        assert!(slots.iter().any(|s| s.start_at == dt("2025-06-16 14:00")));
    }

    #[test]
    fn test_date_before_today_rejected() {
        let store = setup();
        let result = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-05-30 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        );
        assert!(matches!(result, Err(AppError::OutOfRange)));
    }

    #[test]
    fn test_date_past_horizon_rejected() {
        let store = setup();
        let result = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-09-15 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        );
        assert!(matches!(result, Err(AppError::OutOfRange)));
    }

    #[test]
    fn test_closed_day_has_no_slots() {
        let store = setup();
        // 2025-06-17 is a Tuesday, business only opens Mondays
        let slots = open_slots(
            &store,
            "biz-1",
            "svc-1",
            dt("2025-06-17 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        )
        .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_unknown_business_rejected() {
        let store = setup();
        let result = open_slots(
            &store,
            "nope",
            "svc-1",
            dt("2025-06-16 00:00").date(),
            dt("2025-06-01 08:00"),
            90,
            30,
        );
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
