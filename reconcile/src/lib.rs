//! NyumbaPay Reconciliation Engine
//!
//! Three independent activities: ledger self-consistency verification,
//! provider status sync for stale intents, and fuzzy matching of internal
//! payments against external bank transactions.

pub mod bank;
pub mod engine;
pub mod error;
pub mod matching;

pub use bank::{BankTransaction, BankTransactionDirection};
pub use engine::{
    LedgerCheckReport, ProviderSyncReport, ReconcileConfig, ReconciliationEngine,
    ReconciliationExceptionRecord, ReconciliationRecord,
};
pub use error::ReconcileError;
pub use matching::{match_transactions, MatchConfig, MatchOutcome, MatchResult, PaymentMatch};
