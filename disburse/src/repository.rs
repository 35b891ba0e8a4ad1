//! Persistence and lookup ports for disbursements.

use async_trait::async_trait;

use nyumbapay_common::{DisbursementId, OwnerId, TenantId};

use crate::disbursement::{DestinationType, Disbursement};
use crate::error::DisburseError;

/// Disbursement persistence port.
#[async_trait]
pub trait DisbursementRepository: Send + Sync {
    async fn insert(&self, disbursement: Disbursement) -> Result<(), DisburseError>;

    async fn update(&self, disbursement: &Disbursement) -> Result<(), DisburseError>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &DisbursementId,
    ) -> Result<Option<Disbursement>, DisburseError>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<Disbursement>, DisburseError>;

    /// Callback lookup by provider transfer id.
    async fn find_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> Result<Option<Disbursement>, DisburseError>;

    async fn list_for_owner(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Result<Vec<Disbursement>, DisburseError>;
}

/// Resolves where an owner's payouts land. The owner directory itself is an
/// external collaborator; the core only needs this lookup.
#[async_trait]
pub trait PayoutDestinationDirectory: Send + Sync {
    async fn destination_for(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Option<(String, DestinationType)>;
}
