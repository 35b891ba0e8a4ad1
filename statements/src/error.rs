//! Statement error types.

use thiserror::Error;

use nyumbapay_common::{AccountId, CoreError, ErrorKind, StatementId};
use nyumbapay_events::PublishError;
use nyumbapay_ledger::LedgerError;

use crate::statement::StatementStatus;

/// Errors surfaced by the statement builder.
#[derive(Debug, Error)]
pub enum StatementError {
    #[error("a statement already exists for this account and period")]
    DuplicateStatement,

    #[error("statement not found: {0}")]
    StatementNotFound(StatementId),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: StatementStatus,
        to: StatementStatus,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError for StatementError {
    fn kind(&self) -> ErrorKind {
        match self {
            StatementError::DuplicateStatement | StatementError::IllegalTransition { .. } => {
                ErrorKind::State
            }
            StatementError::StatementNotFound(_) | StatementError::AccountNotFound(_) => {
                ErrorKind::NotFound
            }
            StatementError::Ledger(e) => e.kind(),
            StatementError::Publish(_) | StatementError::Storage(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            StatementError::DuplicateStatement => "duplicate_statement",
            StatementError::StatementNotFound(_) => "statement_not_found",
            StatementError::AccountNotFound(_) => "account_not_found",
            StatementError::IllegalTransition { .. } => "illegal_transition",
            StatementError::Ledger(e) => e.code(),
            StatementError::Publish(_) => "event_publish_failed",
            StatementError::Storage(_) => "storage_error",
        }
    }
}
