pub mod stripe;

use async_trait::async_trait;

/// Charge primitives supplied by the hosted payment processor. All calls are
/// at-least-once retriable; callers pass an idempotency key derived from the
/// appointment id, the transition, and the ledger entry.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Place a hold on the client's payment method. Returns an authorization id.
    async fn authorize(
        &self,
        client_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String>;

    /// Convert a hold into an actual charge. Returns a receipt id.
    async fn capture(
        &self,
        authorization_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String>;

    /// Reverse a captured charge. Returns a receipt id.
    async fn refund(
        &self,
        receipt_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> anyhow::Result<String>;

    /// Void an uncaptured hold.
    async fn release(&self, authorization_id: &str) -> anyhow::Result<()>;
}
