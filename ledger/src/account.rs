//! Ledger accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::{
    AccountId, Currency, CustomerId, LedgerEntryId, Money, OwnerId, PropertyId, TenantId,
};

/// Role an account plays in the platform's chart of accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// What a customer owes (rent, deposits, fees).
    CustomerLiability,
    /// An owner's operating funds held by the platform.
    OwnerOperating,
    /// Funds the platform holds in trust pending disbursement.
    PlatformHolding,
    /// The platform's own fee revenue.
    PlatformRevenue,
}

/// Account lifecycle state. Accounts are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

/// Optional link from an account to the party or property it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountScope {
    Customer(CustomerId),
    Owner(OwnerId),
    Property(PropertyId),
}

/// A ledger account with its materialised balance.
///
/// The `version` counter implements optimistic locking: every balance
/// mutation increments it, and writers supply the version they read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub account_type: AccountType,
    pub currency: Currency,
    /// Materialised running balance in minor units. Debits add, credits
    /// subtract, uniformly across account types.
    pub balance_minor_units: i64,
    pub last_entry_id: Option<LedgerEntryId>,
    pub entry_count: u64,
    pub status: AccountStatus,
    pub scope: Option<AccountScope>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh active account with a zero balance.
    pub fn new(tenant_id: TenantId, account_type: AccountType, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            tenant_id,
            account_type,
            currency,
            balance_minor_units: 0,
            last_entry_id: None,
            entry_count: 0,
            status: AccountStatus::Active,
            scope: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a scope reference.
    pub fn with_scope(mut self, scope: AccountScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// The materialised balance as money.
    pub fn balance(&self) -> Money {
        Money::new(self.balance_minor_units, self.currency)
    }

    /// Whether the account accepts postings.
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
