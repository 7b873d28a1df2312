use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub duration_minutes: i32,
    pub price_minor: i64,
    pub requires_deposit: bool,
    pub created_at: NaiveDateTime,
}

/// Immutable copy of a service taken at booking time. Later edits to the
/// catalog never alter existing appointments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_id: String,
    pub name: String,
    pub duration_minutes: i32,
    pub price_minor: i64,
    pub requires_deposit: bool,
}

impl Service {
    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            service_id: self.id.clone(),
            name: self.name.clone(),
            duration_minutes: self.duration_minutes,
            price_minor: self.price_minor,
            requires_deposit: self.requires_deposit,
        }
    }
}
