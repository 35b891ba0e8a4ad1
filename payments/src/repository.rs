//! Persistence port for payment intents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use nyumbapay_common::{PaymentIntentId, TenantId};

use crate::error::PaymentError;
use crate::intent::{PaymentIntent, PaymentStatus};

/// Payment intent persistence port. Production implementations live outside
/// the core; the in-memory one ships alongside for tests.
#[async_trait]
pub trait PaymentIntentRepository: Send + Sync {
    async fn insert(&self, intent: PaymentIntent) -> Result<(), PaymentError>;

    async fn update(&self, intent: &PaymentIntent) -> Result<(), PaymentError>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentError>;

    /// Idempotency lookup; `(tenant, idempotency_key)` is unique.
    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError>;

    /// Webhook lookup; `(provider, external_id)` identifies the intent.
    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError>;

    /// Intents stuck in `Processing` since before `cutoff`.
    async fn list_processing_older_than(
        &self,
        tenant_id: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, PaymentError>;

    /// Intents in any of `statuses` whose `paid_at` falls in `[from, to]`.
    async fn list_paid_in_period(
        &self,
        tenant_id: &TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<PaymentIntent>, PaymentError>;
}
