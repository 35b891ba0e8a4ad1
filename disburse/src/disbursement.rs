//! Disbursement record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::{DisbursementId, LedgerEntryId, Money, OwnerId, TenantId};

use crate::error::DisburseError;

/// Lifecycle state of a disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementStatus {
    Pending,
    Processing,
    InTransit,
    Paid,
    Failed,
    Cancelled,
}

impl DisbursementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisbursementStatus::Paid | DisbursementStatus::Failed | DisbursementStatus::Cancelled
        )
    }

    pub fn valid_transitions(&self) -> &[DisbursementStatus] {
        match self {
            DisbursementStatus::Pending => &[
                DisbursementStatus::Processing,
                DisbursementStatus::Failed,
                DisbursementStatus::Cancelled,
            ],
            DisbursementStatus::Processing => &[
                DisbursementStatus::InTransit,
                DisbursementStatus::Paid,
                DisbursementStatus::Failed,
            ],
            DisbursementStatus::InTransit => {
                &[DisbursementStatus::Paid, DisbursementStatus::Failed]
            }
            DisbursementStatus::Paid
            | DisbursementStatus::Failed
            | DisbursementStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: DisbursementStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Where the payout lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    MobileMoney,
    BankAccount,
    ConnectedAccount,
}

/// Result a disbursement callback carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Paid,
    Failed(String),
    /// The provider never answered; the record needs reconciliation.
    Timeout,
}

/// One payout to a property owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub tenant_id: TenantId,
    pub owner_id: OwnerId,
    pub amount: Money,
    pub status: DisbursementStatus,
    /// Opaque destination handle (phone number, bank account ref, connected
    /// account).
    pub destination: String,
    pub destination_type: DestinationType,
    pub provider_name: Option<String>,
    pub transfer_id: Option<String>,
    pub idempotency_key: String,
    /// First entry of the payout journal, once posted.
    pub ledger_entry_id: Option<LedgerEntryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Set when a timeout callback leaves the provider-side outcome unknown.
    pub needs_reconciliation: bool,
}

impl Disbursement {
    pub fn new(
        tenant_id: TenantId,
        owner_id: OwnerId,
        amount: Money,
        destination: String,
        destination_type: DestinationType,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DisbursementId::new(),
            tenant_id,
            owner_id,
            amount,
            status: DisbursementStatus::Pending,
            destination,
            destination_type,
            provider_name: None,
            transfer_id: None,
            idempotency_key,
            ledger_entry_id: None,
            created_at: now,
            updated_at: now,
            initiated_at: None,
            completed_at: None,
            estimated_arrival: None,
            failure_reason: None,
            needs_reconciliation: false,
        }
    }

    /// Move to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, next: DisbursementStatus) -> Result<(), DisburseError> {
        if !self.status.can_transition_to(next) {
            return Err(DisburseError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next == DisbursementStatus::Paid {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }
}
