//! In-memory repository implementations for tests and single-process wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use nyumbapay_common::{DisbursementId, OwnerId, TenantId};

use crate::disbursement::{DestinationType, Disbursement};
use crate::error::DisburseError;
use crate::repository::{DisbursementRepository, PayoutDestinationDirectory};

#[derive(Default)]
struct State {
    disbursements: HashMap<DisbursementId, Disbursement>,
    by_idempotency: HashMap<(TenantId, String), DisbursementId>,
    by_transfer: HashMap<String, DisbursementId>,
}

/// In-memory disbursement repository.
#[derive(Default)]
pub struct InMemoryDisbursementRepository {
    state: Mutex<State>,
}

impl InMemoryDisbursementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(state: &mut State, disbursement: &Disbursement) {
        state.by_idempotency.insert(
            (
                disbursement.tenant_id.clone(),
                disbursement.idempotency_key.clone(),
            ),
            disbursement.id.clone(),
        );
        if let Some(transfer_id) = &disbursement.transfer_id {
            state
                .by_transfer
                .insert(transfer_id.clone(), disbursement.id.clone());
        }
    }
}

#[async_trait]
impl DisbursementRepository for InMemoryDisbursementRepository {
    async fn insert(&self, disbursement: Disbursement) -> Result<(), DisburseError> {
        let mut state = self.state.lock();
        let key = (
            disbursement.tenant_id.clone(),
            disbursement.idempotency_key.clone(),
        );
        if state.by_idempotency.contains_key(&key) {
            return Err(DisburseError::Storage(format!(
                "duplicate idempotency key {}",
                disbursement.idempotency_key
            )));
        }
        Self::index(&mut state, &disbursement);
        state
            .disbursements
            .insert(disbursement.id.clone(), disbursement);
        Ok(())
    }

    async fn update(&self, disbursement: &Disbursement) -> Result<(), DisburseError> {
        let mut state = self.state.lock();
        if !state.disbursements.contains_key(&disbursement.id) {
            return Err(DisburseError::DisbursementNotFound(disbursement.id.clone()));
        }
        Self::index(&mut state, disbursement);
        state
            .disbursements
            .insert(disbursement.id.clone(), disbursement.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &DisbursementId,
    ) -> Result<Option<Disbursement>, DisburseError> {
        let state = self.state.lock();
        Ok(state
            .disbursements
            .get(id)
            .filter(|d| &d.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<Disbursement>, DisburseError> {
        let state = self.state.lock();
        Ok(state
            .by_idempotency
            .get(&(tenant_id.clone(), idempotency_key.to_string()))
            .and_then(|id| state.disbursements.get(id))
            .cloned())
    }

    async fn find_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> Result<Option<Disbursement>, DisburseError> {
        let state = self.state.lock();
        Ok(state
            .by_transfer
            .get(transfer_id)
            .and_then(|id| state.disbursements.get(id))
            .cloned())
    }

    async fn list_for_owner(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Result<Vec<Disbursement>, DisburseError> {
        let state = self.state.lock();
        let mut found: Vec<Disbursement> = state
            .disbursements
            .values()
            .filter(|d| &d.tenant_id == tenant_id && &d.owner_id == owner_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

/// Static destination directory for tests and single-process wiring.
#[derive(Default)]
pub struct StaticPayoutDestinations {
    destinations: Mutex<HashMap<(TenantId, OwnerId), (String, DestinationType)>>,
}

impl StaticPayoutDestinations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(
        &self,
        tenant_id: TenantId,
        owner_id: OwnerId,
        destination: String,
        destination_type: DestinationType,
    ) {
        self.destinations
            .lock()
            .insert((tenant_id, owner_id), (destination, destination_type));
    }
}

#[async_trait]
impl PayoutDestinationDirectory for StaticPayoutDestinations {
    async fn destination_for(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Option<(String, DestinationType)> {
        self.destinations
            .lock()
            .get(&(tenant_id.clone(), owner_id.clone()))
            .cloned()
    }
}
