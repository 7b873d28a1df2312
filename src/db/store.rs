use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries::{self, DashboardStats};
use crate::models::{
    Appointment, AppointmentStatus, BlockedTime, Business, CancelReason, FeeEntry, Policy,
    Reminder, Service,
};

/// Storage seam for the booking engine. The orchestrator and availability
/// model only talk to this trait, so tests and production pick their own
/// backing store.
pub trait AppointmentStore: Send + Sync {
    fn create_business(&self, business: &Business) -> anyhow::Result<()>;
    fn get_business(&self, id: &str) -> anyhow::Result<Option<Business>>;
    fn deactivate_business(&self, id: &str) -> anyhow::Result<bool>;
    fn create_service(&self, service: &Service) -> anyhow::Result<()>;
    fn get_service(&self, id: &str) -> anyhow::Result<Option<Service>>;
    fn upsert_policy(&self, business_id: &str, policy: &Policy) -> anyhow::Result<()>;
    fn get_policies(&self, business_id: &str) -> anyhow::Result<Vec<Policy>>;

    fn add_blocked_time(&self, blocked: &BlockedTime) -> anyhow::Result<()>;
    fn get_blocked_times_in_range(
        &self,
        business_id: &str,
        start: &NaiveDateTime,
        end: &NaiveDateTime,
    ) -> anyhow::Result<Vec<BlockedTime>>;
    fn remove_blocked_time(&self, id: &str) -> anyhow::Result<bool>;

    /// Atomically check the slot is free and insert the pending hold.
    /// Returns false when another appointment already owns the interval.
    fn reserve_pending(&self, appt: &Appointment) -> anyhow::Result<bool>;
    fn get_appointment(&self, id: &str) -> anyhow::Result<Option<Appointment>>;
    /// Conditional write: succeeds only if the row still has `expect` status.
    fn transition_status(
        &self,
        id: &str,
        expect: AppointmentStatus,
        next: AppointmentStatus,
        cancel_reason: Option<CancelReason>,
    ) -> anyhow::Result<bool>;
    fn get_confirmed_in_range(
        &self,
        business_id: &str,
        start: &NaiveDateTime,
        end: &NaiveDateTime,
    ) -> anyhow::Result<Vec<Appointment>>;
    fn get_appointments_for_business(
        &self,
        business_id: &str,
        status_filter: Option<&str>,
        limit: i64,
    ) -> anyhow::Result<Vec<Appointment>>;
    fn set_deposit_authorization(&self, id: &str, authorization_id: &str) -> anyhow::Result<()>;
    fn mark_deposit_captured(&self, id: &str) -> anyhow::Result<()>;

    fn append_fee(&self, fee: &FeeEntry) -> anyhow::Result<()>;
    fn mark_fee_collected(&self, fee_id: &str, receipt_id: &str) -> anyhow::Result<()>;
    fn get_fee(&self, fee_id: &str) -> anyhow::Result<Option<FeeEntry>>;
    fn get_fees_for_appointment(&self, appointment_id: &str) -> anyhow::Result<Vec<FeeEntry>>;
    fn get_uncollected_fees(&self, business_id: &str) -> anyhow::Result<Vec<FeeEntry>>;

    fn insert_reminder(&self, reminder: &Reminder) -> anyhow::Result<()>;
    fn get_reminders_for_appointment(&self, appointment_id: &str)
        -> anyhow::Result<Vec<Reminder>>;
    fn delete_reminders_for_appointment(&self, appointment_id: &str) -> anyhow::Result<usize>;

    fn get_dashboard_stats(
        &self,
        business_id: &str,
        now: &NaiveDateTime,
    ) -> anyhow::Result<DashboardStats>;
}

/// SQLite-backed store. An `:memory:` database gives tests an in-memory
/// store with identical semantics, including the partial unique index.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(crate::db::init_db(path)?))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

impl AppointmentStore for SqliteStore {
    fn create_business(&self, business: &Business) -> anyhow::Result<()> {
        queries::create_business(&self.lock(), business)
    }

    fn get_business(&self, id: &str) -> anyhow::Result<Option<Business>> {
        queries::get_business(&self.lock(), id)
    }

    fn deactivate_business(&self, id: &str) -> anyhow::Result<bool> {
        queries::deactivate_business(&self.lock(), id)
    }

    fn create_service(&self, service: &Service) -> anyhow::Result<()> {
        queries::create_service(&self.lock(), service)
    }

    fn get_service(&self, id: &str) -> anyhow::Result<Option<Service>> {
        queries::get_service(&self.lock(), id)
    }

    fn upsert_policy(&self, business_id: &str, policy: &Policy) -> anyhow::Result<()> {
        queries::upsert_policy(&self.lock(), business_id, policy)
    }

    fn get_policies(&self, business_id: &str) -> anyhow::Result<Vec<Policy>> {
        queries::get_policies(&self.lock(), business_id)
    }

    fn add_blocked_time(&self, blocked: &BlockedTime) -> anyhow::Result<()> {
        queries::add_blocked_time(&self.lock(), blocked)
    }

    fn get_blocked_times_in_range(
        &self,
        business_id: &str,
        start: &NaiveDateTime,
        end: &NaiveDateTime,
    ) -> anyhow::Result<Vec<BlockedTime>> {
        queries::get_blocked_times_in_range(&self.lock(), business_id, start, end)
    }

    fn remove_blocked_time(&self, id: &str) -> anyhow::Result<bool> {
        queries::remove_blocked_time(&self.lock(), id)
    }

    fn reserve_pending(&self, appt: &Appointment) -> anyhow::Result<bool> {
        queries::reserve_pending(&mut self.lock(), appt)
    }

    fn get_appointment(&self, id: &str) -> anyhow::Result<Option<Appointment>> {
        queries::get_appointment(&self.lock(), id)
    }

    fn transition_status(
        &self,
        id: &str,
        expect: AppointmentStatus,
        next: AppointmentStatus,
        cancel_reason: Option<CancelReason>,
    ) -> anyhow::Result<bool> {
        queries::transition_status(&self.lock(), id, expect, next, cancel_reason)
    }

    fn get_confirmed_in_range(
        &self,
        business_id: &str,
        start: &NaiveDateTime,
        end: &NaiveDateTime,
    ) -> anyhow::Result<Vec<Appointment>> {
        queries::get_confirmed_in_range(&self.lock(), business_id, start, end)
    }

    fn get_appointments_for_business(
        &self,
        business_id: &str,
        status_filter: Option<&str>,
        limit: i64,
    ) -> anyhow::Result<Vec<Appointment>> {
        queries::get_appointments_for_business(&self.lock(), business_id, status_filter, limit)
    }

    fn set_deposit_authorization(&self, id: &str, authorization_id: &str) -> anyhow::Result<()> {
        queries::set_deposit_authorization(&self.lock(), id, authorization_id)
    }

    fn mark_deposit_captured(&self, id: &str) -> anyhow::Result<()> {
        queries::mark_deposit_captured(&self.lock(), id)
    }

    fn append_fee(&self, fee: &FeeEntry) -> anyhow::Result<()> {
        queries::append_fee(&self.lock(), fee)
    }

    fn mark_fee_collected(&self, fee_id: &str, receipt_id: &str) -> anyhow::Result<()> {
        queries::mark_fee_collected(&self.lock(), fee_id, receipt_id)
    }

    fn get_fee(&self, fee_id: &str) -> anyhow::Result<Option<FeeEntry>> {
        queries::get_fee(&self.lock(), fee_id)
    }

    fn get_fees_for_appointment(&self, appointment_id: &str) -> anyhow::Result<Vec<FeeEntry>> {
        queries::get_fees_for_appointment(&self.lock(), appointment_id)
    }

    fn get_uncollected_fees(&self, business_id: &str) -> anyhow::Result<Vec<FeeEntry>> {
        queries::get_uncollected_fees(&self.lock(), business_id)
    }

    fn insert_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        queries::insert_reminder(&self.lock(), reminder)
    }

    fn get_reminders_for_appointment(
        &self,
        appointment_id: &str,
    ) -> anyhow::Result<Vec<Reminder>> {
        queries::get_reminders_for_appointment(&self.lock(), appointment_id)
    }

    fn delete_reminders_for_appointment(&self, appointment_id: &str) -> anyhow::Result<usize> {
        queries::delete_reminders_for_appointment(&self.lock(), appointment_id)
    }

    fn get_dashboard_stats(
        &self,
        business_id: &str,
        now: &NaiveDateTime,
    ) -> anyhow::Result<DashboardStats> {
        queries::get_dashboard_stats(&self.lock(), business_id, now)
    }
}
