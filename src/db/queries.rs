use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    Appointment, AppointmentStatus, BlockedTime, Business, CancelReason, FeeEntry, FeeReason,
    FeeType, Policy, PolicyKind, PolicySnapshot, Reminder, Service, ServiceSnapshot, WorkingHours,
};

const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FMT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FMT).unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Businesses ──

pub fn create_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, timezone, working_hours, deposit_forfeit_on_cancel, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            business.id,
            business.name,
            business.timezone,
            business.working_hours.to_json(),
            business.deposit_forfeit_on_cancel as i32,
            business.active as i32,
            fmt_dt(&business.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let result = conn.query_row(
        "SELECT id, name, timezone, working_hours, deposit_forfeit_on_cancel, active, created_at
         FROM businesses WHERE id = ?1",
        params![id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i32>(4)?,
                row.get::<_, i32>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    );

    match result {
        Ok((id, name, timezone, hours_json, forfeit, active, created_at)) => {
            let working_hours = WorkingHours::from_json(&hours_json)?;
            Ok(Some(Business {
                id,
                name,
                timezone,
                working_hours,
                deposit_forfeit_on_cancel: forfeit != 0,
                active: active != 0,
                created_at: parse_dt(&created_at),
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn deactivate_business(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("UPDATE businesses SET active = 0 WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

// ── Services ──

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, business_id, name, duration_minutes, price_minor, requires_deposit, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            service.id,
            service.business_id,
            service.name,
            service.duration_minutes,
            service.price_minor,
            service.requires_deposit as i32,
            fmt_dt(&service.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn.query_row(
        "SELECT id, business_id, name, duration_minutes, price_minor, requires_deposit, created_at
         FROM services WHERE id = ?1",
        params![id],
        |row| {
            Ok(Service {
                id: row.get(0)?,
                business_id: row.get(1)?,
                name: row.get(2)?,
                duration_minutes: row.get(3)?,
                price_minor: row.get(4)?,
                requires_deposit: row.get::<_, i32>(5)? != 0,
                created_at: parse_dt(&row.get::<_, String>(6)?),
            })
        },
    );

    match result {
        Ok(service) => Ok(Some(service)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Policies ──

pub fn upsert_policy(conn: &Connection, business_id: &str, policy: &Policy) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO policies (business_id, kind, enabled, fee_type, fee_amount, window_hours, free_reschedules)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(business_id, kind) DO UPDATE SET
           enabled = excluded.enabled,
           fee_type = excluded.fee_type,
           fee_amount = excluded.fee_amount,
           window_hours = excluded.window_hours,
           free_reschedules = excluded.free_reschedules",
        params![
            business_id,
            policy.kind.as_str(),
            policy.enabled as i32,
            policy.fee_type.as_str(),
            policy.fee_amount,
            policy.window_hours,
            policy.free_reschedules,
        ],
    )?;
    Ok(())
}

pub fn get_policies(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<Policy>> {
    let mut stmt = conn.prepare(
        "SELECT kind, enabled, fee_type, fee_amount, window_hours, free_reschedules
         FROM policies WHERE business_id = ?1",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i32>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut policies = vec![];
    for row in rows {
        let (kind_str, enabled, fee_type, fee_amount, window_hours, free_reschedules) = row?;
        let Some(kind) = PolicyKind::parse(&kind_str) else {
            continue;
        };
        policies.push(Policy {
            kind,
            enabled: enabled != 0,
            fee_type: FeeType::parse(&fee_type),
            fee_amount,
            window_hours,
            free_reschedules,
        });
    }
    Ok(policies)
}

// ── Blocked times ──

pub fn add_blocked_time(conn: &Connection, blocked: &BlockedTime) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO blocked_times (id, business_id, start_at, end_at, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            blocked.id,
            blocked.business_id,
            fmt_dt(&blocked.start_at),
            fmt_dt(&blocked.end_at),
            blocked.reason,
        ],
    )?;
    Ok(())
}

pub fn get_blocked_times_in_range(
    conn: &Connection,
    business_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<BlockedTime>> {
    let mut stmt = conn.prepare(
        "SELECT id, business_id, start_at, end_at, reason
         FROM blocked_times
         WHERE business_id = ?1 AND start_at < ?2 AND end_at > ?3
         ORDER BY start_at ASC",
    )?;

    let rows = stmt.query_map(params![business_id, fmt_dt(end), fmt_dt(start)], |row| {
        Ok(BlockedTime {
            id: row.get(0)?,
            business_id: row.get(1)?,
            start_at: parse_dt(&row.get::<_, String>(2)?),
            end_at: parse_dt(&row.get::<_, String>(3)?),
            reason: row.get(4)?,
        })
    })?;

    let mut blocked = vec![];
    for row in rows {
        blocked.push(row?);
    }
    Ok(blocked)
}

pub fn remove_blocked_time(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM blocked_times WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

// ── Appointments ──

/// Atomic check-and-reserve: the overlap check and the insert happen inside
/// one transaction, so two concurrent bookings for the same slot cannot both
/// pass. Pending rows hold the slot while the deposit is authorized.
/// Returns false when the slot is already taken.
pub fn reserve_pending(conn: &mut Connection, appt: &Appointment) -> anyhow::Result<bool> {
    let tx = conn.transaction()?;

    let overlapping: i64 = tx.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE business_id = ?1
           AND status IN ('pending', 'confirmed')
           AND start_at < ?2 AND end_at > ?3",
        params![appt.business_id, fmt_dt(&appt.end_at()), fmt_dt(&appt.start_at)],
        |row| row.get(0),
    )?;

    if overlapping > 0 {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO appointments (id, business_id, client_id, service_json, start_at, end_at,
            status, cancel_reason, policy_json, reschedule_count, rescheduled_from,
            deposit_authorization_id, deposit_captured, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            appt.id,
            appt.business_id,
            appt.client_id,
            serde_json::to_string(&appt.service)?,
            fmt_dt(&appt.start_at),
            fmt_dt(&appt.end_at()),
            appt.status.as_str(),
            appt.cancel_reason.map(|r| r.as_str()),
            appt.policies.to_json()?,
            appt.reschedule_count,
            appt.rescheduled_from,
            appt.deposit_authorization_id,
            appt.deposit_captured as i32,
            fmt_dt(&appt.created_at),
            fmt_dt(&appt.updated_at),
        ],
    )?;

    tx.commit()?;
    Ok(true)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("{APPOINTMENT_SELECT} WHERE id = ?1"),
        params![id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Conditional status update: only succeeds when the row is still in the
/// expected state, which linearizes lifecycle transitions per appointment id.
/// A unique-index violation (two confirmed rows on the same slot) is reported
/// as false, the same as losing the race.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    expect: AppointmentStatus,
    next: AppointmentStatus,
    cancel_reason: Option<CancelReason>,
) -> anyhow::Result<bool> {
    let now = fmt_dt(&Utc::now().naive_utc());
    let result = conn.execute(
        "UPDATE appointments SET status = ?1, cancel_reason = COALESCE(?2, cancel_reason), updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![
            next.as_str(),
            cancel_reason.map(|r| r.as_str()),
            now,
            id,
            expect.as_str(),
        ],
    );

    match result {
        Ok(count) => Ok(count > 0),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_confirmed_in_range(
    conn: &Connection,
    business_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "{APPOINTMENT_SELECT}
         WHERE business_id = ?1 AND status = 'confirmed' AND start_at < ?2 AND end_at > ?3
         ORDER BY start_at ASC"
    ))?;

    let rows = stmt.query_map(
        params![business_id, fmt_dt(end), fmt_dt(start)],
        |row| Ok(parse_appointment_row(row)),
    )?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn get_appointments_for_business(
    conn: &Connection,
    business_id: &str,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Appointment>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "{APPOINTMENT_SELECT} WHERE business_id = ?1 AND status = ?2
                 ORDER BY start_at DESC LIMIT ?3"
            ),
            vec![
                Box::new(business_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(status.to_string()),
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "{APPOINTMENT_SELECT} WHERE business_id = ?1
                 ORDER BY start_at DESC LIMIT ?2"
            ),
            vec![
                Box::new(business_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn set_deposit_authorization(
    conn: &Connection,
    id: &str,
    authorization_id: &str,
) -> anyhow::Result<()> {
    let now = fmt_dt(&Utc::now().naive_utc());
    conn.execute(
        "UPDATE appointments SET deposit_authorization_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![authorization_id, now, id],
    )?;
    Ok(())
}

pub fn mark_deposit_captured(conn: &Connection, id: &str) -> anyhow::Result<()> {
    let now = fmt_dt(&Utc::now().naive_utc());
    conn.execute(
        "UPDATE appointments SET deposit_captured = 1, updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

const APPOINTMENT_SELECT: &str =
    "SELECT id, business_id, client_id, service_json, start_at, status, cancel_reason,
            policy_json, reschedule_count, rescheduled_from, deposit_authorization_id,
            deposit_captured, created_at, updated_at
     FROM appointments";

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let id: String = row.get(0)?;
    let business_id: String = row.get(1)?;
    let client_id: String = row.get(2)?;
    let service_json: String = row.get(3)?;
    let start_at_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let cancel_reason: Option<String> = row.get(6)?;
    let policy_json: String = row.get(7)?;
    let reschedule_count: i32 = row.get(8)?;
    let rescheduled_from: Option<String> = row.get(9)?;
    let deposit_authorization_id: Option<String> = row.get(10)?;
    let deposit_captured: i32 = row.get(11)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    let service: ServiceSnapshot = serde_json::from_str(&service_json)?;
    let policies = PolicySnapshot::from_json(&policy_json)?;

    Ok(Appointment {
        id,
        business_id,
        client_id,
        service,
        start_at: parse_dt(&start_at_str),
        status: AppointmentStatus::parse(&status_str),
        cancel_reason: cancel_reason.as_deref().and_then(CancelReason::parse),
        policies,
        reschedule_count,
        rescheduled_from,
        deposit_authorization_id,
        deposit_captured: deposit_captured != 0,
        created_at: parse_dt(&created_at_str),
        updated_at: parse_dt(&updated_at_str),
    })
}

// ── Fee ledger ──

pub fn append_fee(conn: &Connection, fee: &FeeEntry) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO fees (id, appointment_id, reason, amount_minor, collected, receipt_id, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fee.id,
            fee.appointment_id,
            fee.reason.as_str(),
            fee.amount_minor,
            fee.collected as i32,
            fee.receipt_id,
            fmt_dt(&fee.applied_at),
        ],
    )?;
    Ok(())
}

pub fn mark_fee_collected(conn: &Connection, fee_id: &str, receipt_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE fees SET collected = 1, receipt_id = ?1 WHERE id = ?2",
        params![receipt_id, fee_id],
    )?;
    Ok(())
}

pub fn get_fee(conn: &Connection, id: &str) -> anyhow::Result<Option<FeeEntry>> {
    let result = conn.query_row(
        "SELECT id, appointment_id, reason, amount_minor, collected, receipt_id, applied_at
         FROM fees WHERE id = ?1",
        params![id],
        |row| Ok(parse_fee_row(row)),
    );

    match result {
        Ok(fee) => Ok(Some(fee?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_fees_for_appointment(
    conn: &Connection,
    appointment_id: &str,
) -> anyhow::Result<Vec<FeeEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, reason, amount_minor, collected, receipt_id, applied_at
         FROM fees WHERE appointment_id = ?1 ORDER BY applied_at ASC",
    )?;

    let rows = stmt.query_map(params![appointment_id], |row| Ok(parse_fee_row(row)))?;

    let mut fees = vec![];
    for row in rows {
        fees.push(row??);
    }
    Ok(fees)
}

pub fn get_uncollected_fees(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<FeeEntry>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.appointment_id, f.reason, f.amount_minor, f.collected, f.receipt_id, f.applied_at
         FROM fees f JOIN appointments a ON a.id = f.appointment_id
         WHERE a.business_id = ?1 AND f.collected = 0 AND f.amount_minor > 0
         ORDER BY f.applied_at ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| Ok(parse_fee_row(row)))?;

    let mut fees = vec![];
    for row in rows {
        fees.push(row??);
    }
    Ok(fees)
}

fn parse_fee_row(row: &rusqlite::Row) -> anyhow::Result<FeeEntry> {
    let reason_str: String = row.get(2)?;
    let reason = FeeReason::parse(&reason_str)
        .ok_or_else(|| anyhow::anyhow!("unknown fee reason: {reason_str}"))?;
    Ok(FeeEntry {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        reason,
        amount_minor: row.get(3)?,
        collected: row.get::<_, i32>(4)? != 0,
        receipt_id: row.get(5)?,
        applied_at: parse_dt(&row.get::<_, String>(6)?),
    })
}

// ── Reminders ──

pub fn insert_reminder(conn: &Connection, reminder: &Reminder) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO reminders (id, appointment_id, provider_ref, send_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            reminder.id,
            reminder.appointment_id,
            reminder.provider_ref,
            fmt_dt(&reminder.send_at),
        ],
    )?;
    Ok(())
}

pub fn get_reminders_for_appointment(
    conn: &Connection,
    appointment_id: &str,
) -> anyhow::Result<Vec<Reminder>> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, provider_ref, send_at
         FROM reminders WHERE appointment_id = ?1 ORDER BY send_at ASC",
    )?;

    let rows = stmt.query_map(params![appointment_id], |row| {
        Ok(Reminder {
            id: row.get(0)?,
            appointment_id: row.get(1)?,
            provider_ref: row.get(2)?,
            send_at: parse_dt(&row.get::<_, String>(3)?),
        })
    })?;

    let mut reminders = vec![];
    for row in rows {
        reminders.push(row?);
    }
    Ok(reminders)
}

pub fn delete_reminders_for_appointment(
    conn: &Connection,
    appointment_id: &str,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM reminders WHERE appointment_id = ?1",
        params![appointment_id],
    )?;
    Ok(count)
}

// ── Dashboard ──

pub struct DashboardStats {
    pub upcoming_confirmed_count: i64,
    pub uncollected_fee_total_minor: i64,
    pub appointments_today: i64,
}

pub fn get_dashboard_stats(
    conn: &Connection,
    business_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<DashboardStats> {
    let now_str = fmt_dt(now);
    let day_start = fmt_dt(&now.date().and_hms_opt(0, 0, 0).unwrap_or(*now));
    let day_end = fmt_dt(&now.date().and_hms_opt(23, 59, 59).unwrap_or(*now));

    let upcoming_confirmed_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE business_id = ?1 AND status = 'confirmed' AND start_at > ?2",
            params![business_id, now_str],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let uncollected_fee_total_minor: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(f.amount_minor), 0)
             FROM fees f JOIN appointments a ON a.id = f.appointment_id
             WHERE a.business_id = ?1 AND f.collected = 0 AND f.amount_minor > 0",
            params![business_id],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let appointments_today: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE business_id = ?1 AND start_at >= ?2 AND start_at <= ?3
               AND status IN ('confirmed', 'completed')",
            params![business_id, day_start, day_end],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(DashboardStats {
        upcoming_confirmed_count,
        uncollected_fee_total_minor,
        appointments_today,
    })
}
