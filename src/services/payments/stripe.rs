use anyhow::Context;
use async_trait::async_trait;

use super::PaymentProvider;

const STRIPE_API: &str = "https://api.stripe.com/v1";

pub struct StripeProvider {
    secret_key: String,
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            client: reqwest::Client::new(),
        }
    }

    async fn extract_id(response: reqwest::Response, what: &str) -> anyhow::Result<String> {
        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("failed to parse Stripe {what} response"))?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Stripe {what} response missing id"))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn authorize(
        &self,
        client_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String> {
        let amount = amount_minor.to_string();
        let response = self
            .client
            .post(format!("{STRIPE_API}/payment_intents"))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", idempotency_key)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", "usd"),
                ("capture_method", "manual"),
                ("confirm", "true"),
                ("metadata[client_id]", client_id),
            ])
            .send()
            .await
            .context("failed to reach Stripe")?
            .error_for_status()
            .context("Stripe authorization declined")?;

        Self::extract_id(response, "authorization").await
    }

    async fn capture(
        &self,
        authorization_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String> {
        let amount = amount_minor.to_string();
        let response = self
            .client
            .post(format!(
                "{STRIPE_API}/payment_intents/{authorization_id}/capture"
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", idempotency_key)
            .form(&[("amount_to_capture", amount.as_str())])
            .send()
            .await
            .context("failed to reach Stripe")?
            .error_for_status()
            .context("Stripe capture failed")?;

        Self::extract_id(response, "capture").await
    }

    async fn refund(
        &self,
        receipt_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String> {
        let amount = amount_minor.to_string();
        let response = self
            .client
            .post(format!("{STRIPE_API}/refunds"))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", idempotency_key)
            .form(&[
                ("payment_intent", receipt_id),
                ("amount", amount.as_str()),
            ])
            .send()
            .await
            .context("failed to reach Stripe")?
            .error_for_status()
            .context("Stripe refund failed")?;

        Self::extract_id(response, "refund").await
    }

    async fn release(&self, authorization_id: &str) -> anyhow::Result<()> {
        self.client
            .post(format!(
                "{STRIPE_API}/payment_intents/{authorization_id}/cancel"
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .context("failed to reach Stripe")?
            .error_for_status()
            .context("Stripe release failed")?;
        Ok(())
    }
}
