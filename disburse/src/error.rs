//! Disbursement error types.

use thiserror::Error;

use nyumbapay_common::{CoreError, Currency, DisbursementId, ErrorKind, Money, OwnerId, TenantId};
use nyumbapay_events::PublishError;
use nyumbapay_ledger::LedgerError;
use nyumbapay_payments::{PaymentError, ProviderError};

use crate::disbursement::DisbursementStatus;

/// Errors surfaced by the disbursement service and scheduler.
#[derive(Debug, Error)]
pub enum DisburseError {
    #[error("disbursement amount must be positive")]
    NonPositiveAmount,

    #[error("requested {requested} exceeds available {available}")]
    InsufficientBalance {
        requested: Money,
        available: Money,
    },

    #[error("no operating account for owner {0}")]
    OwnerAccountNotFound(OwnerId),

    #[error("tenant has no platform holding account")]
    HoldingAccountNotFound,

    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("disbursement not found: {0}")]
    DisbursementNotFound(DisbursementId),

    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        expected: Currency,
        actual: Currency,
    },

    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: DisbursementStatus,
        to: DisbursementStatus,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError for DisburseError {
    fn kind(&self) -> ErrorKind {
        match self {
            DisburseError::NonPositiveAmount | DisburseError::CurrencyMismatch { .. } => {
                ErrorKind::Validation
            }
            DisburseError::InsufficientBalance { .. } | DisburseError::IllegalTransition { .. } => {
                ErrorKind::State
            }
            DisburseError::OwnerAccountNotFound(_)
            | DisburseError::HoldingAccountNotFound
            | DisburseError::TenantNotFound(_)
            | DisburseError::DisbursementNotFound(_) => ErrorKind::NotFound,
            DisburseError::Provider(e) => e.kind(),
            DisburseError::Payment(e) => e.kind(),
            DisburseError::Ledger(e) => e.kind(),
            DisburseError::Publish(_) | DisburseError::Storage(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            DisburseError::NonPositiveAmount => "non_positive_amount",
            DisburseError::InsufficientBalance { .. } => "insufficient_balance",
            DisburseError::OwnerAccountNotFound(_) => "owner_account_not_found",
            DisburseError::HoldingAccountNotFound => "holding_account_not_found",
            DisburseError::TenantNotFound(_) => "tenant_not_found",
            DisburseError::DisbursementNotFound(_) => "disbursement_not_found",
            DisburseError::CurrencyMismatch { .. } => "currency_mismatch",
            DisburseError::IllegalTransition { .. } => "illegal_transition",
            DisburseError::Provider(e) => e.code(),
            DisburseError::Payment(e) => e.code(),
            DisburseError::Ledger(e) => e.code(),
            DisburseError::Publish(_) => "event_publish_failed",
            DisburseError::Storage(_) => "storage_error",
        }
    }
}
