//! Ledger error types.

use thiserror::Error;

use nyumbapay_common::{AccountId, CoreError, Currency, ErrorKind, LedgerEntryId};
use nyumbapay_events::PublishError;

/// Errors surfaced by the ledger engine and its repositories.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("journal has no lines")]
    EmptyJournal,

    #[error("journal does not balance: debits {debits}, credits {credits}")]
    UnbalancedJournal { debits: i64, credits: i64 },

    #[error("journal spans more than one currency")]
    MixedCurrencyJournal,

    #[error("journal line amount must be positive")]
    NonPositiveAmount,

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account {0} is not active")]
    AccountInactive(AccountId),

    #[error("currency mismatch on {account_id}: account is {expected}, line is {actual}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    #[error("optimistic lock exhausted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("ledger entry not found: {0}")]
    EntryNotFound(LedgerEntryId),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::EmptyJournal
            | LedgerError::UnbalancedJournal { .. }
            | LedgerError::MixedCurrencyJournal
            | LedgerError::NonPositiveAmount
            | LedgerError::CurrencyMismatch { .. } => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) | LedgerError::EntryNotFound(_) => ErrorKind::NotFound,
            LedgerError::AccountInactive(_) => ErrorKind::State,
            LedgerError::ConcurrencyConflict { .. } => ErrorKind::Concurrency,
            LedgerError::Publish(_) | LedgerError::Storage(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            LedgerError::EmptyJournal => "empty_journal",
            LedgerError::UnbalancedJournal { .. } => "unbalanced_journal",
            LedgerError::MixedCurrencyJournal => "mixed_currency_journal",
            LedgerError::NonPositiveAmount => "non_positive_amount",
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::AccountInactive(_) => "account_inactive",
            LedgerError::CurrencyMismatch { .. } => "currency_mismatch",
            LedgerError::ConcurrencyConflict { .. } => "concurrency_conflict",
            LedgerError::EntryNotFound(_) => "entry_not_found",
            LedgerError::Publish(_) => "event_publish_failed",
            LedgerError::Storage(_) => "storage_error",
        }
    }
}
