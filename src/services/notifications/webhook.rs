use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{NotificationProvider, ReminderPayload};

/// Hands reminders to the hosted notification dispatcher over HTTP. The
/// dispatcher owns delivery (SMS/email/push); this side only schedules and
/// cancels.
pub struct WebhookNotifier {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationProvider for WebhookNotifier {
    async fn schedule(
        &self,
        send_at: NaiveDateTime,
        payload: &ReminderPayload,
    ) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "send_at": send_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "payload": payload,
        });

        let response: serde_json::Value = self
            .client
            .post(format!("{}/reminders", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("failed to reach notification dispatcher")?
            .error_for_status()
            .context("notification dispatcher rejected reminder")?
            .json()
            .await
            .context("failed to parse dispatcher response")?;

        response
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("dispatcher response missing reminder id"))
    }

    async fn cancel(&self, reminder_ref: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(format!("{}/reminders/{reminder_ref}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach notification dispatcher")?;

        // Unknown or already-fired reminders cancel as a no-op.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .context("notification dispatcher rejected cancellation")?;
        Ok(())
    }
}
