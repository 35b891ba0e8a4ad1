//! Event publisher port and implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use nyumbapay_common::{now, CoreError, ErrorKind};

use crate::event::DomainEvent;
use crate::outbox::{OutboxEnvelope, OutboxError, OutboxStore};

/// Failure to stage an event for delivery.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialise event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl CoreError for PublishError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    fn code(&self) -> &'static str {
        match self {
            PublishError::Serialize(_) => "event_serialize_failed",
            PublishError::Outbox(_) => "outbox_append_failed",
        }
    }
}

/// Port through which components publish domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError>;
}

/// Store-and-forward publisher: stages envelopes in the outbox.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
}

impl OutboxPublisher {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventPublisher for OutboxPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        let envelope = OutboxEnvelope::from_event(&event, now())?;
        debug!(
            event_type = event.event_type(),
            aggregate_id = %envelope.aggregate_id,
            "Event staged"
        );
        self.store.append(envelope).await?;
        Ok(())
    }
}

/// Captures published events in memory; for assertions in tests.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Drain and return the captured events.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Discards all events.
#[derive(Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: DomainEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
