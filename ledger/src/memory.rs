//! In-memory ledger store used by tests and single-process wiring.
//!
//! Both repositories share one mutex-guarded state so a journal's entries
//! and account updates commit atomically, matching the contract production
//! back-ends must provide. Version and sequence checks report conflicts the
//! same way a database compare-and-set would, which is what exercises the
//! engine's retry loop.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use nyumbapay_common::{AccountId, LedgerEntryId, PaymentIntentId, TenantId};

use crate::account::{Account, AccountScope, AccountStatus, AccountType};
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::repository::{AccountRepository, BalanceUpdate, EntryPage, LedgerRepository};

type AccountKey = (TenantId, AccountId);

#[derive(Default)]
struct State {
    accounts: HashMap<AccountKey, Account>,
    entries: HashMap<AccountKey, Vec<LedgerEntry>>,
    entry_index: HashMap<LedgerEntryId, AccountKey>,
}

/// In-memory implementation of both ledger ports.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixture hook: store an entry without sequence, balance or version
    /// bookkeeping. Integrity tests use this to fabricate corrupt histories;
    /// never call it from production paths.
    pub async fn insert_entry_unchecked(&self, entry: LedgerEntry) {
        let mut state = self.state.lock().await;
        let key = (entry.tenant_id.clone(), entry.account_id.clone());
        state.entry_index.insert(entry.id.clone(), key.clone());
        state.entries.entry(key).or_default().push(entry);
    }

    /// Fixture hook: overwrite a stored account's materialised balance.
    pub async fn overwrite_balance_unchecked(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        balance_minor_units: i64,
    ) {
        let mut state = self.state.lock().await;
        if let Some(account) = state
            .accounts
            .get_mut(&(tenant_id.clone(), account_id.clone()))
        {
            account.balance_minor_units = balance_minor_units;
        }
    }
}

fn check_commit(state: &State, entries: &[LedgerEntry], updates: &[BalanceUpdate]) -> Option<bool> {
    // Group the journal's entries per account, preserving order.
    let mut grouped: HashMap<&AccountId, Vec<&LedgerEntry>> = HashMap::new();
    for entry in entries {
        grouped.entry(&entry.account_id).or_default().push(entry);
    }

    for update in updates {
        let tenant_id = entries
            .iter()
            .find(|e| e.account_id == update.account_id)
            .map(|e| &e.tenant_id)?;
        let key = (tenant_id.clone(), update.account_id.clone());
        let account = state.accounts.get(&key)?;

        if account.version != update.expected_version {
            return Some(false);
        }
        let group = grouped.get(&update.account_id)?;
        let mut expected_seq = account.entry_count + 1;
        for entry in group.iter() {
            if entry.sequence_number != expected_seq {
                return Some(false);
            }
            expected_seq += 1;
        }
        if update.new_entry_count != account.entry_count + group.len() as u64 {
            return Some(false);
        }
    }
    Some(true)
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    async fn commit_journal(
        &self,
        entries: &[LedgerEntry],
        updates: &[BalanceUpdate],
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;

        match check_commit(&state, entries, updates) {
            Some(true) => {}
            Some(false) => return Ok(false),
            None => {
                return Err(LedgerError::Storage(
                    "commit references an unknown account".to_string(),
                ))
            }
        }

        for entry in entries {
            let key = (entry.tenant_id.clone(), entry.account_id.clone());
            state.entry_index.insert(entry.id.clone(), key.clone());
            state.entries.entry(key).or_default().push(entry.clone());
        }
        for update in updates {
            let key = state
                .entry_index
                .get(&update.last_entry_id)
                .cloned()
                .expect("entry just inserted");
            let account = state.accounts.get_mut(&key).expect("account checked above");
            account.balance_minor_units = update.new_balance_minor_units;
            account.last_entry_id = Some(update.last_entry_id.clone());
            account.entry_count = update.new_entry_count;
            account.version += 1;
            account.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn get_next_sequence(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<u64, LedgerError> {
        let state = self.state.lock().await;
        let account = state
            .accounts
            .get(&(tenant_id.clone(), account_id.clone()))
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        Ok(account.entry_count + 1)
    }

    async fn entry(
        &self,
        tenant_id: &TenantId,
        id: &LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let Some(key) = state.entry_index.get(id) else {
            return Ok(None);
        };
        if &key.0 != tenant_id {
            return Ok(None);
        }
        Ok(state
            .entries
            .get(key)
            .and_then(|entries| entries.iter().find(|e| &e.id == id))
            .cloned())
    }

    async fn entries_for_account(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<EntryPage, LedgerError> {
        let state = self.state.lock().await;
        let mut entries = state
            .entries
            .get(&(tenant_id.clone(), account_id.clone()))
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.sequence_number);
        let total = entries.len() as u64;
        let page = entries.into_iter().skip(offset).take(limit).collect();
        Ok(EntryPage {
            entries: page,
            offset,
            limit,
            total,
        })
    }

    async fn entries_in_period(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .get(&(tenant_id.clone(), account_id.clone()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| from <= e.effective_date && e.effective_date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| e.sequence_number);
        Ok(entries)
    }

    async fn entries_for_payment_intent(
        &self,
        tenant_id: &TenantId,
        payment_intent_id: &PaymentIntentId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut found: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|(key, _)| &key.0 == tenant_id)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|e| e.references.payment_intent_id.as_ref() == Some(payment_intent_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.posted_at.cmp(&b.posted_at));
        Ok(found)
    }

    async fn sequence_numbers(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<Vec<u64>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .get(&(tenant_id.clone(), account_id.clone()))
            .map(|entries| entries.iter().map(|e| e.sequence_number).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AccountRepository for InMemoryLedgerStore {
    async fn create(&self, account: Account) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let key = (account.tenant_id.clone(), account.id.clone());
        state.accounts.insert(key, account);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&(tenant_id.clone(), id.clone())).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Account>, LedgerError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .iter()
            .filter(|(key, _)| &key.0 == tenant_id)
            .map(|(_, account)| account.clone())
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    async fn find_for_scope(
        &self,
        tenant_id: &TenantId,
        account_type: AccountType,
        scope: Option<&AccountScope>,
    ) -> Result<Option<Account>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .iter()
            .filter(|(key, _)| &key.0 == tenant_id)
            .map(|(_, account)| account)
            .find(|account| {
                account.account_type == account_type && account.scope.as_ref() == scope
            })
            .cloned())
    }

    async fn update_balance(&self, update: &BalanceUpdate) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        let Some(account) = state
            .accounts
            .values_mut()
            .find(|account| account.id == update.account_id)
        else {
            return Err(LedgerError::AccountNotFound(update.account_id.clone()));
        };
        if account.version != update.expected_version {
            return Ok(false);
        }
        account.balance_minor_units = update.new_balance_minor_units;
        account.last_entry_id = Some(update.last_entry_id.clone());
        account.entry_count = update.new_entry_count;
        account.version += 1;
        account.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: &AccountId,
        status: AccountStatus,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&(tenant_id.clone(), id.clone()))
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(())
    }
}
