//! Reconciliation error types.

use thiserror::Error;

use nyumbapay_common::{CoreError, ErrorKind};
use nyumbapay_events::PublishError;
use nyumbapay_ledger::LedgerError;
use nyumbapay_payments::PaymentError;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError for ReconcileError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Ledger(e) => e.kind(),
            ReconcileError::Payment(e) => e.kind(),
            ReconcileError::Publish(_) | ReconcileError::Storage(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ReconcileError::Ledger(e) => e.code(),
            ReconcileError::Payment(e) => e.code(),
            ReconcileError::Publish(_) => "event_publish_failed",
            ReconcileError::Storage(_) => "storage_error",
        }
    }
}
