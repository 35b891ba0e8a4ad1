//! NyumbaPay Domain Events
//!
//! Every core component publishes domain events through the `EventPublisher`
//! port. The production publisher writes envelopes to an outbox as part of
//! the unit of work that produced them; a processor drains the outbox,
//! delivers to a sink and retries with exponential backoff. Subscribers may
//! observe duplicates and must be idempotent.

pub mod event;
pub mod outbox;
pub mod processor;
pub mod publisher;

pub use event::{DomainEvent, ExceptionSeverity};
pub use outbox::{InMemoryOutboxStore, OutboxEnvelope, OutboxError, OutboxStatus, OutboxStore};
pub use processor::{
    DrainStats, EventSink, EventSubscriber, FanoutSink, OutboxConfig, OutboxProcessor, SinkError,
};
pub use publisher::{EventPublisher, MemoryPublisher, NoopPublisher, OutboxPublisher, PublishError};
