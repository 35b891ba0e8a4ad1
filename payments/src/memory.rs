//! In-memory payment intent repository for tests and single-process wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use nyumbapay_common::{PaymentIntentId, TenantId};

use crate::error::PaymentError;
use crate::intent::{PaymentIntent, PaymentStatus};
use crate::repository::PaymentIntentRepository;

#[derive(Default)]
struct State {
    intents: HashMap<PaymentIntentId, PaymentIntent>,
    by_idempotency: HashMap<(TenantId, String), PaymentIntentId>,
    by_external: HashMap<(String, String), PaymentIntentId>,
}

/// In-memory implementation with the idempotency and external-id indexes.
#[derive(Default)]
pub struct InMemoryPaymentIntentRepository {
    state: Mutex<State>,
}

impl InMemoryPaymentIntentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(state: &mut State, intent: &PaymentIntent) {
        state.by_idempotency.insert(
            (intent.tenant_id.clone(), intent.idempotency_key.clone()),
            intent.id.clone(),
        );
        if let (Some(provider), Some(external)) = (&intent.provider_name, &intent.external_id) {
            state
                .by_external
                .insert((provider.clone(), external.clone()), intent.id.clone());
        }
    }
}

#[async_trait]
impl PaymentIntentRepository for InMemoryPaymentIntentRepository {
    async fn insert(&self, intent: PaymentIntent) -> Result<(), PaymentError> {
        let mut state = self.state.lock();
        let key = (intent.tenant_id.clone(), intent.idempotency_key.clone());
        if state.by_idempotency.contains_key(&key) {
            return Err(PaymentError::Storage(format!(
                "duplicate idempotency key {} for tenant {}",
                intent.idempotency_key, intent.tenant_id
            )));
        }
        Self::index(&mut state, &intent);
        state.intents.insert(intent.id.clone(), intent);
        Ok(())
    }

    async fn update(&self, intent: &PaymentIntent) -> Result<(), PaymentError> {
        let mut state = self.state.lock();
        if !state.intents.contains_key(&intent.id) {
            return Err(PaymentError::IntentNotFound(intent.id.clone()));
        }
        Self::index(&mut state, intent);
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let state = self.state.lock();
        Ok(state
            .intents
            .get(id)
            .filter(|intent| &intent.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let state = self.state.lock();
        Ok(state
            .by_idempotency
            .get(&(tenant_id.clone(), idempotency_key.to_string()))
            .and_then(|id| state.intents.get(id))
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let state = self.state.lock();
        Ok(state
            .by_external
            .get(&(provider.to_string(), external_id.to_string()))
            .and_then(|id| state.intents.get(id))
            .cloned())
    }

    async fn list_processing_older_than(
        &self,
        tenant_id: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PaymentIntent>, PaymentError> {
        let state = self.state.lock();
        let mut intents: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|intent| {
                &intent.tenant_id == tenant_id
                    && intent.status == PaymentStatus::Processing
                    && intent.updated_at < cutoff
            })
            .cloned()
            .collect();
        intents.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(intents)
    }

    async fn list_paid_in_period(
        &self,
        tenant_id: &TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<PaymentIntent>, PaymentError> {
        let state = self.state.lock();
        let mut intents: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|intent| {
                &intent.tenant_id == tenant_id
                    && statuses.contains(&intent.status)
                    && intent
                        .paid_at
                        .map(|t| from <= t && t <= to)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        intents.sort_by(|a, b| {
            a.paid_at
                .cmp(&b.paid_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(intents)
    }
}
