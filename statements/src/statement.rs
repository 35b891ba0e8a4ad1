//! Statement types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::{
    AccountId, Currency, CustomerId, Money, OwnerId, Period, PropertyId, StatementId, TenantId,
};
use nyumbapay_ledger::LedgerEntryType;

use crate::error::StatementError;

/// Delivery lifecycle of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementStatus {
    Draft,
    Generated,
    Sent,
    Viewed,
}

impl StatementStatus {
    pub fn valid_transitions(&self) -> &[StatementStatus] {
        match self {
            StatementStatus::Draft => &[StatementStatus::Generated],
            StatementStatus::Generated => &[StatementStatus::Sent],
            StatementStatus::Sent => &[StatementStatus::Viewed],
            StatementStatus::Viewed => &[],
        }
    }

    pub fn can_transition_to(&self, next: StatementStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Who the statement is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementType {
    Owner,
    Customer,
    Account,
}

/// One statement line, with the running balance after the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub date: DateTime<Utc>,
    pub entry_type: LedgerEntryType,
    pub description: String,
    pub reference: String,
    pub debit: Option<Money>,
    pub credit: Option<Money>,
    pub balance: Money,
}

/// Per-entry-type totals over the period. `net = debits − credits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub entry_type: LedgerEntryType,
    pub total_debits: Money,
    pub total_credits: Money,
    pub net: Money,
}

/// A materialised period statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub tenant_id: TenantId,
    pub statement_type: StatementType,
    pub status: StatementStatus,
    pub account_id: AccountId,
    pub owner_id: Option<OwnerId>,
    pub customer_id: Option<CustomerId>,
    pub property_id: Option<PropertyId>,
    pub period: Period,
    pub currency: Currency,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub total_debits: Money,
    pub total_credits: Money,
    pub line_items: Vec<LineItem>,
    pub category_summaries: Vec<CategorySummary>,
    pub generated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub delivery_destination: Option<String>,
}

impl Statement {
    /// Move to a new delivery status.
    pub fn transition_to(&mut self, next: StatementStatus) -> Result<(), StatementError> {
        if !self.status.can_transition_to(next) {
            return Err(StatementError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        let now = Utc::now();
        match next {
            StatementStatus::Sent => self.sent_at = Some(now),
            StatementStatus::Viewed => self.viewed_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}
