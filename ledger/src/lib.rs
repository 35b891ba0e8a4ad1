//! NyumbaPay Ledger Engine
//!
//! Immutable double-entry ledger: atomic journal posting, materialised
//! balances with optimistic locking, gapless per-account sequences, and
//! correction/void by compensating entries.

pub mod account;
pub mod engine;
pub mod entry;
pub mod error;
pub mod memory;
pub mod repository;

pub use account::{Account, AccountScope, AccountStatus, AccountType};
pub use engine::{LedgerEngine, PeriodView, SequenceReport, VerificationReport};
pub use entry::{
    EntryDirection, EntryReferences, JournalLine, JournalResult, LedgerEntry, LedgerEntryType,
    PostJournalRequest,
};
pub use error::LedgerError;
pub use memory::InMemoryLedgerStore;
pub use repository::{AccountRepository, BalanceUpdate, EntryPage, LedgerRepository};
