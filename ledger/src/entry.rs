//! Journal and entry types for double-entry posting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::{
    AccountId, JournalId, LeaseId, LedgerEntryId, Money, PaymentIntentId, PropertyId, TenantId,
    UnitId,
};

/// Side of a double-entry posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    /// Sign applied to the materialised balance: debit adds, credit
    /// subtracts, uniformly across account types.
    pub fn signed_factor(&self) -> i64 {
        match self {
            EntryDirection::Debit => 1,
            EntryDirection::Credit => -1,
        }
    }

    /// The opposite side.
    pub fn inverse(&self) -> Self {
        match self {
            EntryDirection::Debit => EntryDirection::Credit,
            EntryDirection::Credit => EntryDirection::Debit,
        }
    }
}

/// Closed set of business meanings an entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    Payment,
    Refund,
    PlatformFee,
    ProcessingFee,
    Maintenance,
    Deduction,
    Holdback,
    Disbursement,
    Deposit,
    Adjustment,
}

/// Optional links from an entry to the business objects that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryReferences {
    pub payment_intent_id: Option<PaymentIntentId>,
    pub lease_id: Option<LeaseId>,
    pub property_id: Option<PropertyId>,
    pub unit_id: Option<UnitId>,
}

impl EntryReferences {
    pub fn for_payment_intent(payment_intent_id: PaymentIntentId) -> Self {
        Self {
            payment_intent_id: Some(payment_intent_id),
            ..Self::default()
        }
    }
}

/// A single immutable line within a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub journal_id: JournalId,
    pub entry_type: LedgerEntryType,
    pub direction: EntryDirection,
    pub amount: Money,
    /// Running balance of the account through this entry.
    pub balance_after: Money,
    /// Strictly increasing and gapless per `(tenant, account)`.
    pub sequence_number: u64,
    pub effective_date: DateTime<Utc>,
    pub posted_at: DateTime<Utc>,
    pub description: String,
    pub references: EntryReferences,
    /// Set on compensating entries posted by corrections and voids.
    pub correction_of: Option<LedgerEntryId>,
    pub created_by: String,
}

impl LedgerEntry {
    /// Signed minor-unit amount: positive for debit, negative for credit.
    pub fn signed_amount(&self) -> i64 {
        self.direction.signed_factor() * self.amount.minor_units
    }
}

/// One requested line of a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: AccountId,
    pub entry_type: LedgerEntryType,
    pub direction: EntryDirection,
    pub amount: Money,
    pub description: String,
    #[serde(default)]
    pub references: EntryReferences,
    pub correction_of: Option<LedgerEntryId>,
}

impl JournalLine {
    pub fn debit(
        account_id: AccountId,
        entry_type: LedgerEntryType,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            entry_type,
            direction: EntryDirection::Debit,
            amount,
            description: description.into(),
            references: EntryReferences::default(),
            correction_of: None,
        }
    }

    pub fn credit(
        account_id: AccountId,
        entry_type: LedgerEntryType,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            entry_type,
            direction: EntryDirection::Credit,
            amount,
            description: description.into(),
            references: EntryReferences::default(),
            correction_of: None,
        }
    }

    pub fn with_references(mut self, references: EntryReferences) -> Self {
        self.references = references;
        self
    }
}

/// Request to post one balanced journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostJournalRequest {
    pub tenant_id: TenantId,
    pub effective_date: DateTime<Utc>,
    pub created_by: String,
    pub lines: Vec<JournalLine>,
}

/// Outcome of a committed journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalResult {
    pub journal_id: JournalId,
    pub entries: Vec<LedgerEntry>,
}

/// Sum the debit and credit sides of a set of lines, in minor units.
pub fn line_totals(lines: &[JournalLine]) -> (i64, i64) {
    lines.iter().fold((0, 0), |(d, c), line| match line.direction {
        EntryDirection::Debit => (d + line.amount.minor_units, c),
        EntryDirection::Credit => (d, c + line.amount.minor_units),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyumbapay_common::Currency;

    #[test]
    fn totals_split_by_direction() {
        let account = AccountId::new();
        let lines = vec![
            JournalLine::debit(
                account.clone(),
                LedgerEntryType::Payment,
                Money::new(100_000, Currency::KES),
                "rent",
            ),
            JournalLine::credit(
                account.clone(),
                LedgerEntryType::Payment,
                Money::new(95_000, Currency::KES),
                "net",
            ),
            JournalLine::credit(
                account,
                LedgerEntryType::PlatformFee,
                Money::new(5_000, Currency::KES),
                "fee",
            ),
        ];

        assert_eq!(line_totals(&lines), (100_000, 100_000));
    }

    #[test]
    fn direction_sign_and_inverse() {
        assert_eq!(EntryDirection::Debit.signed_factor(), 1);
        assert_eq!(EntryDirection::Credit.signed_factor(), -1);
        assert_eq!(EntryDirection::Debit.inverse(), EntryDirection::Credit);
    }
}
