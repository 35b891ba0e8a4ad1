//! Durable staging area for outbound events.
//!
//! Envelopes are written by the `OutboxPublisher` within the unit of work
//! that produced them and drained by the `OutboxProcessor`. Batch locking is
//! by `(lock_id, owner, expires_at)`; a crashed processor's locks expire and
//! the batch becomes claimable again.

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use nyumbapay_common::{CoreError, ErrorKind, TenantId, Timestamp};

use crate::event::DomainEvent;

/// Delivery status of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
    DeadLetter,
}

/// A claimed batch lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxLock {
    pub lock_id: Uuid,
    pub owner: String,
    pub expires_at: Timestamp,
}

/// A persisted outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEnvelope {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub tenant_id: TenantId,
    pub created_at: Timestamp,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub lock: Option<OutboxLock>,
}

impl OutboxEnvelope {
    /// Wrap a domain event for staging.
    pub fn from_event(event: &DomainEvent, now: Timestamp) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            tenant_id: event.tenant_id().clone(),
            created_at: now,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            lock: None,
        })
    }

    /// Decode the staged payload back into a domain event.
    pub fn decode(&self) -> Result<DomainEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    fn is_claimable(&self, now: Timestamp) -> bool {
        let due = match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.next_retry_at.map(|t| t <= now).unwrap_or(true),
            OutboxStatus::Published | OutboxStatus::DeadLetter => false,
        };
        due && self.lock.as_ref().map(|l| l.expires_at <= now).unwrap_or(true)
    }
}

/// Outbox errors.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("envelope {0} not found")]
    EnvelopeNotFound(Uuid),
    #[error("envelope {id} is locked by {owner}")]
    LockHeld { id: Uuid, owner: String },
}

impl CoreError for OutboxError {
    fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::EnvelopeNotFound(_) => ErrorKind::NotFound,
            OutboxError::LockHeld { .. } => ErrorKind::Concurrency,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            OutboxError::EnvelopeNotFound(_) => "outbox_envelope_not_found",
            OutboxError::LockHeld { .. } => "outbox_lock_held",
        }
    }
}

/// Persistence port for the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stage an envelope.
    async fn append(&self, envelope: OutboxEnvelope) -> Result<(), OutboxError>;

    /// Claim up to `limit` due envelopes under a TTL'd lock, oldest first.
    async fn lock_batch(
        &self,
        owner: &str,
        limit: usize,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<Vec<OutboxEnvelope>, OutboxError>;

    /// Mark a locked envelope delivered.
    async fn mark_published(&self, id: Uuid, now: Timestamp) -> Result<(), OutboxError>;

    /// Record a delivery failure. `dead_letter` retires the envelope;
    /// otherwise it becomes claimable again at `next_retry_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Timestamp,
        dead_letter: bool,
    ) -> Result<(), OutboxError>;

    /// Fetch an envelope by id.
    async fn get(&self, id: Uuid) -> Result<Option<OutboxEnvelope>, OutboxError>;

    /// Count of envelopes awaiting delivery (pending or retryable).
    async fn undelivered_count(&self) -> usize;

    /// Count of dead-lettered envelopes.
    async fn dead_letter_count(&self) -> usize;
}

/// In-memory outbox store for tests and single-process wiring.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    envelopes: DashMap<Uuid, OutboxEnvelope>,
    /// Append order, so batches drain oldest first.
    order: Mutex<Vec<Uuid>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, envelope: OutboxEnvelope) -> Result<(), OutboxError> {
        self.order.lock().push(envelope.id);
        self.envelopes.insert(envelope.id, envelope);
        Ok(())
    }

    async fn lock_batch(
        &self,
        owner: &str,
        limit: usize,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<Vec<OutboxEnvelope>, OutboxError> {
        let order = self.order.lock().clone();
        let mut claimed = Vec::new();
        for id in order {
            if claimed.len() >= limit {
                break;
            }
            if let Some(mut envelope) = self.envelopes.get_mut(&id) {
                if envelope.is_claimable(now) {
                    envelope.lock = Some(OutboxLock {
                        lock_id: Uuid::new_v4(),
                        owner: owner.to_string(),
                        expires_at: now + ttl,
                    });
                    claimed.push(envelope.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, id: Uuid, _now: Timestamp) -> Result<(), OutboxError> {
        let mut envelope = self
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        envelope.status = OutboxStatus::Published;
        envelope.lock = None;
        envelope.next_retry_at = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Timestamp,
        dead_letter: bool,
    ) -> Result<(), OutboxError> {
        let mut envelope = self
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        envelope.retry_count += 1;
        envelope.last_error = Some(error.to_string());
        envelope.lock = None;
        if dead_letter {
            envelope.status = OutboxStatus::DeadLetter;
            envelope.next_retry_at = None;
        } else {
            envelope.status = OutboxStatus::Failed;
            envelope.next_retry_at = Some(next_retry_at);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEnvelope>, OutboxError> {
        Ok(self.envelopes.get(&id).map(|e| e.clone()))
    }

    async fn undelivered_count(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|e| matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed))
            .count()
    }

    async fn dead_letter_count(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|e| e.status == OutboxStatus::DeadLetter)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyumbapay_common::{now, Currency, CustomerId, Money, PaymentIntentId};

    fn sample_event() -> DomainEvent {
        DomainEvent::PaymentCreated {
            tenant_id: TenantId::new("tn-1"),
            payment_intent_id: PaymentIntentId::new(),
            customer_id: CustomerId::new("cust-1"),
            amount: Money::new(100_000, Currency::KES),
        }
    }

    #[test]
    fn lock_batch_claims_oldest_first_and_respects_locks() {
        tokio_test::block_on(async {
            let store = InMemoryOutboxStore::new();
            let t0 = now();
            for _ in 0..3 {
                store
                    .append(OutboxEnvelope::from_event(&sample_event(), t0).unwrap())
                    .await
                    .unwrap();
            }

            let first = store
                .lock_batch("worker-a", 2, Duration::seconds(30), t0)
                .await
                .unwrap();
            assert_eq!(first.len(), 2);

            // Remaining claimable envelope is the third one only.
            let second = store
                .lock_batch("worker-b", 10, Duration::seconds(30), t0)
                .await
                .unwrap();
            assert_eq!(second.len(), 1);

            // After the TTL passes the unpublished envelopes are claimable again.
            let later = t0 + Duration::seconds(31);
            let reclaimed = store
                .lock_batch("worker-c", 10, Duration::seconds(30), later)
                .await
                .unwrap();
            assert_eq!(reclaimed.len(), 3);
        });
    }

    #[test]
    fn publish_and_fail_transitions() {
        tokio_test::block_on(async {
            let store = InMemoryOutboxStore::new();
            let t0 = now();
            let envelope = OutboxEnvelope::from_event(&sample_event(), t0).unwrap();
            let id = envelope.id;
            store.append(envelope).await.unwrap();

            store
                .mark_failed(id, "sink unavailable", t0 + Duration::seconds(2), false)
                .await
                .unwrap();
            let failed = store.get(id).await.unwrap().unwrap();
            assert_eq!(failed.status, OutboxStatus::Failed);
            assert_eq!(failed.retry_count, 1);
            assert!(!failed.is_claimable(t0));
            assert!(failed.is_claimable(t0 + Duration::seconds(2)));

            store.mark_published(id, t0 + Duration::seconds(3)).await.unwrap();
            let published = store.get(id).await.unwrap().unwrap();
            assert_eq!(published.status, OutboxStatus::Published);
            assert_eq!(store.undelivered_count().await, 0);
        });
    }
}
