use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A candidate bookable interval. Derived from availability on every query,
/// never persisted; admission is decided atomically at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub business_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: String,
    pub business_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub reason: Option<String>,
}
