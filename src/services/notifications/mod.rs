pub mod webhook;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub appointment_id: String,
    pub client_id: String,
    pub business_name: String,
    pub service_name: String,
    pub start_at: String,
}

/// Future-time notification dispatch. `cancel` is idempotent: cancelling an
/// already-fired or unknown reminder is a no-op.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn schedule(
        &self,
        send_at: NaiveDateTime,
        payload: &ReminderPayload,
    ) -> anyhow::Result<String>;

    async fn cancel(&self, reminder_ref: &str) -> anyhow::Result<()>;
}
