//! External bank transaction input model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::Money;

/// Direction of a bank transaction relative to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BankTransactionDirection {
    /// Money into the account.
    Credit,
    /// Money out of the account.
    Debit,
}

/// One line of an external bank statement, as ingested from the bank feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Bank-side identifier, unique within the statement.
    pub id: String,
    pub date: DateTime<Utc>,
    pub amount: Money,
    pub direction: BankTransactionDirection,
    /// Free-form narrative the bank carries for the transaction.
    pub reference: String,
}
