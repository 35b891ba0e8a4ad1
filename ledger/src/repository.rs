//! Persistence ports for the ledger.
//!
//! Implementations must make the per-journal write atomic: either all
//! entries and all affected account updates commit, or none do. Production
//! back-ends live outside the core; `InMemoryLedgerStore` ships alongside
//! for tests and single-process wiring.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use nyumbapay_common::{AccountId, LedgerEntryId, PaymentIntentId, TenantId};

use crate::account::{Account, AccountScope, AccountStatus, AccountType};
use crate::entry::LedgerEntry;
use crate::error::LedgerError;

/// The account mutation a committed journal carries for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    pub new_balance_minor_units: i64,
    pub last_entry_id: LedgerEntryId,
    pub new_entry_count: u64,
    /// Version the writer read; the commit fails if it moved.
    pub expected_version: u64,
}

/// One page of entries, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    pub offset: usize,
    pub limit: usize,
    pub total: u64,
}

impl EntryPage {
    pub fn has_more(&self) -> bool {
        (self.offset + self.entries.len()) < self.total as usize
    }
}

/// Account persistence port.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: Account) -> Result<(), LedgerError>;

    async fn get(&self, tenant_id: &TenantId, id: &AccountId)
        -> Result<Option<Account>, LedgerError>;

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Account>, LedgerError>;

    /// Find the account of a given type and scope, e.g. the operating
    /// account of one owner or the tenant's holding account (scope `None`).
    async fn find_for_scope(
        &self,
        tenant_id: &TenantId,
        account_type: AccountType,
        scope: Option<&AccountScope>,
    ) -> Result<Option<Account>, LedgerError>;

    /// Compare-and-set balance update. Returns `false` when
    /// `expected_version` no longer matches.
    async fn update_balance(&self, update: &BalanceUpdate) -> Result<bool, LedgerError>;

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: &AccountId,
        status: AccountStatus,
    ) -> Result<(), LedgerError>;
}

/// Entry persistence port.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Atomically persist a journal's entries and account updates.
    /// Returns `false` when any account version or sequence allocation has
    /// been overtaken; the caller re-reads and retries.
    async fn commit_journal(
        &self,
        entries: &[LedgerEntry],
        updates: &[BalanceUpdate],
    ) -> Result<bool, LedgerError>;

    /// Next sequence number for `(tenant, account)`.
    async fn get_next_sequence(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<u64, LedgerError>;

    async fn entry(
        &self,
        tenant_id: &TenantId,
        id: &LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Page through an account's entries in sequence order.
    async fn entries_for_account(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<EntryPage, LedgerError>;

    /// All entries with `effective_date` in `[from, to]`, sequence order.
    async fn entries_in_period(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    async fn entries_for_payment_intent(
        &self,
        tenant_id: &TenantId,
        payment_intent_id: &PaymentIntentId,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Raw sequence numbers stored for `(tenant, account)`, unordered.
    async fn sequence_numbers(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<Vec<u64>, LedgerError>;
}
