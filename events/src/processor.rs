//! Outbox drain processor.
//!
//! Polls the outbox, claims a TTL'd batch, delivers to the sink and records
//! the outcome. Failed deliveries back off exponentially (`2^retry_count`
//! seconds) and dead-letter once `retry_count` reaches `max_retries`.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use nyumbapay_common::{now, Timestamp};

use crate::event::DomainEvent;
use crate::outbox::{OutboxError, OutboxStore};

/// Delivery failure reported by a sink or subscriber.
#[derive(Debug, Clone, Error)]
#[error("event delivery failed: {0}")]
pub struct SinkError(pub String);

/// Transport the processor delivers events into.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError>;
}

/// An in-process consumer of domain events. Handlers must be idempotent;
/// the processor redelivers on failure and duplicates are possible.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), SinkError>;
}

/// Fans each event out to every registered subscriber. All subscribers are
/// attempted; the first failure is reported so the envelope is retried.
#[derive(Default)]
pub struct FanoutSink {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        let mut first_error = None;
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.handle(event).await {
                warn!(
                    subscriber = subscriber.name(),
                    event_type = event.event_type(),
                    error = %e,
                    "Subscriber failed"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Poll interval of the drain loop.
    pub poll_interval: std::time::Duration,
    /// Envelopes claimed per batch.
    pub batch_size: usize,
    /// Batch lock TTL.
    pub lock_ttl: Duration,
    /// Dead-letter threshold.
    pub max_retries: u32,
    /// Lock owner label for this processor instance.
    pub owner: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_millis(500),
            batch_size: 50,
            lock_ttl: Duration::seconds(30),
            max_retries: 5,
            owner: "outbox-processor".to_string(),
        }
    }
}

/// Outcome of a single drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Drains the outbox into an event sink.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    sink: Arc<dyn EventSink>,
    config: OutboxConfig,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn OutboxStore>, sink: Arc<dyn EventSink>, config: OutboxConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// Claim and process one batch.
    #[instrument(skip(self), fields(owner = %self.config.owner))]
    pub async fn drain_once(&self, now: Timestamp) -> Result<DrainStats, OutboxError> {
        let batch = self
            .store
            .lock_batch(&self.config.owner, self.config.batch_size, self.config.lock_ttl, now)
            .await?;

        let mut stats = DrainStats::default();
        for envelope in batch {
            let event = match envelope.decode() {
                Ok(event) => event,
                Err(e) => {
                    // Undecodable payloads can never deliver; retire them.
                    warn!(envelope_id = %envelope.id, error = %e, "Dead-lettering undecodable envelope");
                    self.store
                        .mark_failed(envelope.id, &e.to_string(), now, true)
                        .await?;
                    stats.dead_lettered += 1;
                    continue;
                }
            };

            match self.sink.deliver(&event).await {
                Ok(()) => {
                    self.store.mark_published(envelope.id, now).await?;
                    stats.published += 1;
                }
                Err(e) => {
                    let retries = envelope.retry_count + 1;
                    let dead = retries >= self.config.max_retries;
                    let backoff = Duration::seconds(1i64 << retries.min(30));
                    self.store
                        .mark_failed(envelope.id, &e.0, now + backoff, dead)
                        .await?;
                    if dead {
                        warn!(envelope_id = %envelope.id, retries, "Envelope dead-lettered");
                        stats.dead_lettered += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
            }
        }

        if stats != DrainStats::default() {
            info!(
                published = stats.published,
                failed = stats.failed,
                dead_lettered = stats.dead_lettered,
                "Outbox batch drained"
            );
        }
        Ok(stats)
    }

    /// Run the drain loop until the task is aborted.
    pub async fn run_loop(&self) {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if let Err(e) = self.drain_once(now()).await {
                warn!(error = %e, "Outbox drain pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{InMemoryOutboxStore, OutboxEnvelope, OutboxStatus};
    use crate::publisher::{EventPublisher, OutboxPublisher};
    use nyumbapay_common::{Currency, CustomerId, Money, PaymentIntentId, TenantId};
    use parking_lot::Mutex;

    fn sample_event() -> DomainEvent {
        DomainEvent::PaymentCreated {
            tenant_id: TenantId::new("tn-1"),
            payment_intent_id: PaymentIntentId::new(),
            customer_id: CustomerId::new("cust-1"),
            amount: Money::new(100_000, Currency::KES),
        }
    }

    #[derive(Default)]
    struct RecordingSubscriber {
        seen: Mutex<Vec<String>>,
        fail_times: Mutex<u32>,
    }

    #[async_trait]
    impl EventSubscriber for RecordingSubscriber {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, event: &DomainEvent) -> Result<(), SinkError> {
            let mut failures = self.fail_times.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SinkError("transient".to_string()));
            }
            self.seen.lock().push(event.event_type().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_staged_events_to_subscribers() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let publisher = OutboxPublisher::new(store.clone());
        publisher.publish(sample_event()).await.unwrap();

        let subscriber = Arc::new(RecordingSubscriber::default());
        let sink = Arc::new(FanoutSink::new().subscribe(subscriber.clone()));
        let processor = OutboxProcessor::new(store.clone(), sink, OutboxConfig::default());

        let stats = processor.drain_once(now()).await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(subscriber.seen.lock().as_slice(), ["payment_created"]);
        assert_eq!(store.undelivered_count().await, 0);
    }

    #[tokio::test]
    async fn failed_delivery_backs_off_then_succeeds() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let t0 = now();
        let envelope = OutboxEnvelope::from_event(&sample_event(), t0).unwrap();
        let id = envelope.id;
        store.append(envelope).await.unwrap();

        let subscriber = Arc::new(RecordingSubscriber::default());
        *subscriber.fail_times.lock() = 1;
        let sink = Arc::new(FanoutSink::new().subscribe(subscriber.clone()));
        let processor = OutboxProcessor::new(store.clone(), sink, OutboxConfig::default());

        let stats = processor.drain_once(t0).await.unwrap();
        assert_eq!(stats.failed, 1);
        let failed = store.get(id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        // Backoff is 2^1 seconds after the first failure.
        assert_eq!(failed.next_retry_at.unwrap(), t0 + Duration::seconds(2));

        // Not yet due: nothing claimed.
        let idle = processor.drain_once(t0 + Duration::seconds(1)).await.unwrap();
        assert_eq!(idle, DrainStats::default());

        let stats = processor.drain_once(t0 + Duration::seconds(3)).await.unwrap();
        assert_eq!(stats.published, 1);
    }

    #[tokio::test]
    async fn dead_letters_after_max_retries() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let t0 = now();
        let envelope = OutboxEnvelope::from_event(&sample_event(), t0).unwrap();
        let id = envelope.id;
        store.append(envelope).await.unwrap();

        let subscriber = Arc::new(RecordingSubscriber::default());
        *subscriber.fail_times.lock() = u32::MAX;
        let sink = Arc::new(FanoutSink::new().subscribe(subscriber));
        let config = OutboxConfig {
            max_retries: 3,
            ..OutboxConfig::default()
        };
        let processor = OutboxProcessor::new(store.clone(), sink, config);

        let mut t = t0;
        for _ in 0..3 {
            processor.drain_once(t).await.unwrap();
            t = t + Duration::seconds(3600);
        }

        let envelope = store.get(id).await.unwrap().unwrap();
        assert_eq!(envelope.status, OutboxStatus::DeadLetter);
        assert_eq!(envelope.retry_count, 3);
        assert_eq!(store.dead_letter_count().await, 1);
    }
}
