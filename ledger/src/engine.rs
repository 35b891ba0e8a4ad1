//! Core ledger engine implementation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use nyumbapay_common::{AccountId, JournalId, LedgerEntryId, Money, TenantId};
use nyumbapay_events::{DomainEvent, EventPublisher};

use crate::account::Account;
use crate::entry::{
    line_totals, JournalLine, JournalResult, LedgerEntry, PostJournalRequest,
};
use crate::error::LedgerError;
use crate::repository::{AccountRepository, BalanceUpdate, EntryPage, LedgerRepository};

/// Bounded optimistic-lock retries before surfacing `concurrency_conflict`.
const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Classification of a posting.
///
/// Standard journals must balance debits against credits. Compensating
/// journals are the intra-account reversals emitted by corrections and
/// voids; they keep every other invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalKind {
    Standard,
    Compensating,
}

/// Materialised-vs-recomputed balance comparison for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub account_id: AccountId,
    pub materialised: Money,
    pub computed: Money,
    pub discrepancy_minor_units: i64,
    pub valid: bool,
}

/// Sequence integrity report for one account. Gaps are fatal for
/// reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceReport {
    pub account_id: AccountId,
    pub gaps: Vec<u64>,
    pub duplicates: Vec<u64>,
    pub valid: bool,
}

/// Period-bounded view of one account: opening balance, entries, totals.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodView {
    pub account_id: AccountId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub total_debits: Money,
    pub total_credits: Money,
    pub entries: Vec<LedgerEntry>,
}

/// The ledger engine: posting, balances, verification, corrections.
pub struct LedgerEngine {
    accounts: Arc<dyn AccountRepository>,
    entries: Arc<dyn LedgerRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl LedgerEngine {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        entries: Arc<dyn LedgerRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            accounts,
            entries,
            publisher,
        }
    }

    /// Post a balanced journal atomically.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, lines = request.lines.len()))]
    pub async fn post_journal(
        &self,
        request: PostJournalRequest,
    ) -> Result<JournalResult, LedgerError> {
        self.post_lines(request, JournalKind::Standard).await
    }

    async fn post_lines(
        &self,
        request: PostJournalRequest,
        kind: JournalKind,
    ) -> Result<JournalResult, LedgerError> {
        if request.lines.is_empty() {
            return Err(LedgerError::EmptyJournal);
        }
        if request.lines.iter().any(|line| !line.amount.is_positive()) {
            return Err(LedgerError::NonPositiveAmount);
        }
        let currency = request.lines[0].amount.currency;
        if request.lines.iter().any(|line| line.amount.currency != currency) {
            return Err(LedgerError::MixedCurrencyJournal);
        }
        if kind == JournalKind::Standard {
            let (debits, credits) = line_totals(&request.lines);
            if debits != credits {
                return Err(LedgerError::UnbalancedJournal { debits, credits });
            }
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let (journal_id, entries, updates, loaded) = self.build_journal(&request).await?;

            if self.entries.commit_journal(&entries, &updates).await? {
                info!(
                    journal_id = %journal_id,
                    entries = entries.len(),
                    accounts = updates.len(),
                    "Journal committed"
                );
                self.publish_committed(&request.tenant_id, &journal_id, &entries, &updates, &loaded)
                    .await?;
                return Ok(JournalResult {
                    journal_id,
                    entries,
                });
            }

            warn!(
                tenant_id = %request.tenant_id,
                attempt,
                "Journal commit lost an optimistic race, retrying"
            );
        }

        Err(LedgerError::ConcurrencyConflict {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Load and validate the affected accounts, then lay out entries with
    /// allocated sequences and running balances. Re-run on every attempt so
    /// a retry sees fresh versions.
    async fn build_journal(
        &self,
        request: &PostJournalRequest,
    ) -> Result<
        (
            JournalId,
            Vec<LedgerEntry>,
            Vec<BalanceUpdate>,
            HashMap<AccountId, Account>,
        ),
        LedgerError,
    > {
        let mut loaded: HashMap<AccountId, Account> = HashMap::new();
        let mut order: Vec<AccountId> = Vec::new();

        for line in &request.lines {
            if loaded.contains_key(&line.account_id) {
                continue;
            }
            let account = self
                .accounts
                .get(&request.tenant_id, &line.account_id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(line.account_id.clone()))?;
            if !account.is_active() {
                return Err(LedgerError::AccountInactive(account.id.clone()));
            }
            order.push(line.account_id.clone());
            loaded.insert(line.account_id.clone(), account);
        }
        for line in &request.lines {
            let account = &loaded[&line.account_id];
            if line.amount.currency != account.currency {
                return Err(LedgerError::CurrencyMismatch {
                    account_id: account.id.clone(),
                    expected: account.currency,
                    actual: line.amount.currency,
                });
            }
        }

        struct Running {
            balance: i64,
            next_sequence: u64,
            entry_count: u64,
            last_entry_id: Option<LedgerEntryId>,
        }

        let mut running: HashMap<AccountId, Running> = HashMap::new();
        for account_id in &order {
            let account = &loaded[account_id];
            let next_sequence = self
                .entries
                .get_next_sequence(&request.tenant_id, account_id)
                .await?;
            running.insert(
                account_id.clone(),
                Running {
                    balance: account.balance_minor_units,
                    next_sequence,
                    entry_count: account.entry_count,
                    last_entry_id: None,
                },
            );
        }

        let journal_id = JournalId::new();
        let posted_at = Utc::now();
        let mut entries = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            let account = &loaded[&line.account_id];
            let state = running.get_mut(&line.account_id).expect("loaded above");

            state.balance += line.direction.signed_factor() * line.amount.minor_units;
            let sequence_number = state.next_sequence;
            state.next_sequence += 1;
            state.entry_count += 1;

            let entry = LedgerEntry {
                id: LedgerEntryId::new(),
                tenant_id: request.tenant_id.clone(),
                account_id: line.account_id.clone(),
                journal_id: journal_id.clone(),
                entry_type: line.entry_type,
                direction: line.direction,
                amount: line.amount,
                balance_after: Money::new(state.balance, account.currency),
                sequence_number,
                effective_date: request.effective_date,
                posted_at,
                description: line.description.clone(),
                references: line.references.clone(),
                correction_of: line.correction_of.clone(),
                created_by: request.created_by.clone(),
            };
            state.last_entry_id = Some(entry.id.clone());
            entries.push(entry);
        }

        let updates = order
            .iter()
            .map(|account_id| {
                let account = &loaded[account_id];
                let state = &running[account_id];
                BalanceUpdate {
                    account_id: account_id.clone(),
                    new_balance_minor_units: state.balance,
                    last_entry_id: state.last_entry_id.clone().expect("account has a line"),
                    new_entry_count: state.entry_count,
                    expected_version: account.version,
                }
            })
            .collect();

        Ok((journal_id, entries, updates, loaded))
    }

    async fn publish_committed(
        &self,
        tenant_id: &TenantId,
        journal_id: &JournalId,
        entries: &[LedgerEntry],
        updates: &[BalanceUpdate],
        loaded: &HashMap<AccountId, Account>,
    ) -> Result<(), LedgerError> {
        self.publisher
            .publish(DomainEvent::LedgerEntriesCreated {
                tenant_id: tenant_id.clone(),
                journal_id: journal_id.clone(),
                entry_ids: entries.iter().map(|e| e.id.clone()).collect(),
                effective_date: entries[0].effective_date,
            })
            .await?;
        for update in updates {
            let currency = loaded[&update.account_id].currency;
            self.publisher
                .publish(DomainEvent::AccountBalanceUpdated {
                    tenant_id: tenant_id.clone(),
                    account_id: update.account_id.clone(),
                    balance: Money::new(update.new_balance_minor_units, currency),
                    last_entry_id: update.last_entry_id.clone(),
                    entry_count: update.new_entry_count,
                })
                .await?;
        }
        Ok(())
    }

    /// Materialised balance of an account.
    pub async fn balance(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
    ) -> Result<Money, LedgerError> {
        let account = self
            .accounts
            .get(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        Ok(account.balance())
    }

    /// Balance recomputed from entries effective at or before `at`.
    pub async fn balance_as_of(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
        at: DateTime<Utc>,
    ) -> Result<Money, LedgerError> {
        let account = self
            .accounts
            .get(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        let entries = self
            .entries
            .entries_in_period(tenant_id, account_id, DateTime::<Utc>::MIN_UTC, at)
            .await?;
        let total: i64 = entries.iter().map(|e| e.signed_amount()).sum();
        Ok(Money::new(total, account.currency))
    }

    /// Page through an account's entries in sequence order.
    pub async fn entries(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
        offset: usize,
        limit: usize,
    ) -> Result<EntryPage, LedgerError> {
        self.entries
            .entries_for_account(tenant_id, account_id, offset, limit)
            .await
    }

    /// Compare the materialised balance against the sum of entries.
    #[instrument(skip(self))]
    pub async fn verify_account_balance(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
    ) -> Result<VerificationReport, LedgerError> {
        let account = self
            .accounts
            .get(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        let entries = self
            .entries
            .entries_in_period(
                tenant_id,
                account_id,
                DateTime::<Utc>::MIN_UTC,
                DateTime::<Utc>::MAX_UTC,
            )
            .await?;
        let computed: i64 = entries.iter().map(|e| e.signed_amount()).sum();
        let discrepancy = account.balance_minor_units - computed;
        Ok(VerificationReport {
            account_id: account_id.clone(),
            materialised: account.balance(),
            computed: Money::new(computed, account.currency),
            discrepancy_minor_units: discrepancy,
            valid: discrepancy == 0,
        })
    }

    /// Check the stored sequence numbers form `{1, …, entry_count}`.
    #[instrument(skip(self))]
    pub async fn verify_sequence(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
    ) -> Result<SequenceReport, LedgerError> {
        let account = self
            .accounts
            .get(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        let numbers = self.entries.sequence_numbers(tenant_id, account_id).await?;

        let mut counts: HashMap<u64, u32> = HashMap::new();
        for n in &numbers {
            *counts.entry(*n).or_insert(0) += 1;
        }
        let max_seen = numbers.iter().copied().max().unwrap_or(0);
        let upper = account.entry_count.max(max_seen);

        let mut gaps: Vec<u64> = (1..=upper).filter(|n| !counts.contains_key(n)).collect();
        gaps.sort_unstable();
        let mut duplicates: Vec<u64> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(n, _)| *n)
            .collect();
        duplicates.sort_unstable();

        let valid = gaps.is_empty() && duplicates.is_empty();
        if !valid {
            warn!(
                account_id = %account_id,
                gaps = gaps.len(),
                duplicates = duplicates.len(),
                "Sequence integrity violated"
            );
        }
        Ok(SequenceReport {
            account_id: account_id.clone(),
            gaps,
            duplicates,
            valid,
        })
    }

    /// Period-bounded account view: opening balance, entries, totals.
    pub async fn statement(
        &self,
        account_id: &AccountId,
        tenant_id: &TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PeriodView, LedgerError> {
        let opening = self
            .balance_as_of(account_id, tenant_id, from - chrono::Duration::milliseconds(1))
            .await?;
        let entries = self
            .entries
            .entries_in_period(tenant_id, account_id, from, to)
            .await?;

        let mut debits = 0i64;
        let mut credits = 0i64;
        for entry in &entries {
            match entry.direction {
                crate::entry::EntryDirection::Debit => debits += entry.amount.minor_units,
                crate::entry::EntryDirection::Credit => credits += entry.amount.minor_units,
            }
        }
        let closing = Money::new(opening.minor_units + debits - credits, opening.currency);

        Ok(PeriodView {
            account_id: account_id.clone(),
            from,
            to,
            opening_balance: opening,
            closing_balance: closing,
            total_debits: Money::new(debits, opening.currency),
            total_credits: Money::new(credits, opening.currency),
            entries,
        })
    }

    /// Correct an entry's amount: reverse the original and repost with the
    /// corrected amount. Existing entries are never mutated.
    #[instrument(skip(self, reason))]
    pub async fn post_correction(
        &self,
        tenant_id: &TenantId,
        original_entry_id: &LedgerEntryId,
        corrected_amount: Money,
        reason: &str,
    ) -> Result<JournalResult, LedgerError> {
        let original = self
            .entries
            .entry(tenant_id, original_entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(original_entry_id.clone()))?;
        original.amount.ensure_same_currency(corrected_amount).map_err(|_| {
            LedgerError::CurrencyMismatch {
                account_id: original.account_id.clone(),
                expected: original.amount.currency,
                actual: corrected_amount.currency,
            }
        })?;

        let reversal = JournalLine {
            account_id: original.account_id.clone(),
            entry_type: original.entry_type,
            direction: original.direction.inverse(),
            amount: original.amount,
            description: format!("Reversal of {}: {reason}", original.id),
            references: original.references.clone(),
            correction_of: Some(original.id.clone()),
        };
        let corrected = JournalLine {
            account_id: original.account_id.clone(),
            entry_type: original.entry_type,
            direction: original.direction,
            amount: corrected_amount,
            description: format!("Correction of {}: {reason}", original.id),
            references: original.references.clone(),
            correction_of: Some(original.id.clone()),
        };

        self.post_lines(
            PostJournalRequest {
                tenant_id: tenant_id.clone(),
                effective_date: Utc::now(),
                created_by: original.created_by.clone(),
                lines: vec![reversal, corrected],
            },
            JournalKind::Compensating,
        )
        .await
    }

    /// Void an entry by posting its reversal.
    #[instrument(skip(self, reason))]
    pub async fn void_entry(
        &self,
        tenant_id: &TenantId,
        entry_id: &LedgerEntryId,
        reason: &str,
    ) -> Result<JournalResult, LedgerError> {
        let original = self
            .entries
            .entry(tenant_id, entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.clone()))?;

        let reversal = JournalLine {
            account_id: original.account_id.clone(),
            entry_type: original.entry_type,
            direction: original.direction.inverse(),
            amount: original.amount,
            description: format!("Void of {}: {reason}", original.id),
            references: original.references.clone(),
            correction_of: Some(original.id.clone()),
        };

        self.post_lines(
            PostJournalRequest {
                tenant_id: tenant_id.clone(),
                effective_date: Utc::now(),
                created_by: original.created_by.clone(),
                lines: vec![reversal],
            },
            JournalKind::Compensating,
        )
        .await
    }
}
