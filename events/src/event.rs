//! Domain event definitions.

use serde::{Deserialize, Serialize};

use nyumbapay_common::{
    AccountId, CustomerId, DisbursementId, JournalId, LeaseId, LedgerEntryId, Money, OwnerId,
    PaymentIntentId, StatementId, TenantId, Timestamp,
};

/// Severity attached to reconciliation exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionSeverity {
    Warning,
    Critical,
}

/// Events published by the core components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    /// A balanced journal committed; one event per journal.
    LedgerEntriesCreated {
        tenant_id: TenantId,
        journal_id: JournalId,
        entry_ids: Vec<LedgerEntryId>,
        effective_date: Timestamp,
    },
    /// A materialised account balance moved; one event per mutated account.
    AccountBalanceUpdated {
        tenant_id: TenantId,
        account_id: AccountId,
        balance: Money,
        last_entry_id: LedgerEntryId,
        entry_count: u64,
    },
    PaymentCreated {
        tenant_id: TenantId,
        payment_intent_id: PaymentIntentId,
        customer_id: CustomerId,
        amount: Money,
    },
    /// Carries the fee split so subscribers can post the success journal.
    PaymentSucceeded {
        tenant_id: TenantId,
        payment_intent_id: PaymentIntentId,
        customer_id: CustomerId,
        lease_id: Option<LeaseId>,
        amount: Money,
        platform_fee: Money,
        net_amount: Money,
        paid_at: Timestamp,
        receipt_url: Option<String>,
    },
    PaymentFailed {
        tenant_id: TenantId,
        payment_intent_id: PaymentIntentId,
        reason: String,
    },
    PaymentCancelled {
        tenant_id: TenantId,
        payment_intent_id: PaymentIntentId,
        reason: Option<String>,
    },
    /// Carries the original totals so subscribers can derive the pro-rata
    /// inverse journal.
    PaymentRefunded {
        tenant_id: TenantId,
        payment_intent_id: PaymentIntentId,
        customer_id: CustomerId,
        amount: Money,
        refunded_total: Money,
        original_amount: Money,
        original_platform_fee: Money,
        full: bool,
    },
    DisbursementInitiated {
        tenant_id: TenantId,
        disbursement_id: DisbursementId,
        owner_id: OwnerId,
        amount: Money,
    },
    DisbursementSettled {
        tenant_id: TenantId,
        disbursement_id: DisbursementId,
        owner_id: OwnerId,
        amount: Money,
    },
    DisbursementFailed {
        tenant_id: TenantId,
        disbursement_id: DisbursementId,
        owner_id: OwnerId,
        reason: String,
    },
    StatementGenerated {
        tenant_id: TenantId,
        statement_id: StatementId,
        account_id: AccountId,
        period_start: Timestamp,
        period_end: Timestamp,
    },
    StatementSent {
        tenant_id: TenantId,
        statement_id: StatementId,
        destination: String,
    },
    /// Two independent sources disagree; requires resolution.
    ReconciliationException {
        tenant_id: TenantId,
        account_id: Option<AccountId>,
        code: String,
        severity: ExceptionSeverity,
        detail: String,
    },
}

impl DomainEvent {
    /// Stable event-type discriminator stored on outbox envelopes.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LedgerEntriesCreated { .. } => "ledger_entries_created",
            DomainEvent::AccountBalanceUpdated { .. } => "account_balance_updated",
            DomainEvent::PaymentCreated { .. } => "payment_created",
            DomainEvent::PaymentSucceeded { .. } => "payment_succeeded",
            DomainEvent::PaymentFailed { .. } => "payment_failed",
            DomainEvent::PaymentCancelled { .. } => "payment_cancelled",
            DomainEvent::PaymentRefunded { .. } => "payment_refunded",
            DomainEvent::DisbursementInitiated { .. } => "disbursement_initiated",
            DomainEvent::DisbursementSettled { .. } => "disbursement_settled",
            DomainEvent::DisbursementFailed { .. } => "disbursement_failed",
            DomainEvent::StatementGenerated { .. } => "statement_generated",
            DomainEvent::StatementSent { .. } => "statement_sent",
            DomainEvent::ReconciliationException { .. } => "reconciliation_exception",
        }
    }

    /// Aggregate kind the event belongs to.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            DomainEvent::LedgerEntriesCreated { .. } => "journal",
            DomainEvent::AccountBalanceUpdated { .. } => "account",
            DomainEvent::PaymentCreated { .. }
            | DomainEvent::PaymentSucceeded { .. }
            | DomainEvent::PaymentFailed { .. }
            | DomainEvent::PaymentCancelled { .. }
            | DomainEvent::PaymentRefunded { .. } => "payment_intent",
            DomainEvent::DisbursementInitiated { .. }
            | DomainEvent::DisbursementSettled { .. }
            | DomainEvent::DisbursementFailed { .. } => "disbursement",
            DomainEvent::StatementGenerated { .. } | DomainEvent::StatementSent { .. } => {
                "statement"
            }
            DomainEvent::ReconciliationException { .. } => "reconciliation",
        }
    }

    /// Identity of the aggregate the event belongs to.
    pub fn aggregate_id(&self) -> String {
        match self {
            DomainEvent::LedgerEntriesCreated { journal_id, .. } => journal_id.to_string(),
            DomainEvent::AccountBalanceUpdated { account_id, .. } => account_id.to_string(),
            DomainEvent::PaymentCreated {
                payment_intent_id, ..
            }
            | DomainEvent::PaymentSucceeded {
                payment_intent_id, ..
            }
            | DomainEvent::PaymentFailed {
                payment_intent_id, ..
            }
            | DomainEvent::PaymentCancelled {
                payment_intent_id, ..
            }
            | DomainEvent::PaymentRefunded {
                payment_intent_id, ..
            } => payment_intent_id.to_string(),
            DomainEvent::DisbursementInitiated {
                disbursement_id, ..
            }
            | DomainEvent::DisbursementSettled {
                disbursement_id, ..
            }
            | DomainEvent::DisbursementFailed {
                disbursement_id, ..
            } => disbursement_id.to_string(),
            DomainEvent::StatementGenerated { statement_id, .. }
            | DomainEvent::StatementSent { statement_id, .. } => statement_id.to_string(),
            DomainEvent::ReconciliationException {
                account_id, ..
            } => account_id
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "tenant".to_string()),
        }
    }

    /// Tenant scope of the event.
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            DomainEvent::LedgerEntriesCreated { tenant_id, .. }
            | DomainEvent::AccountBalanceUpdated { tenant_id, .. }
            | DomainEvent::PaymentCreated { tenant_id, .. }
            | DomainEvent::PaymentSucceeded { tenant_id, .. }
            | DomainEvent::PaymentFailed { tenant_id, .. }
            | DomainEvent::PaymentCancelled { tenant_id, .. }
            | DomainEvent::PaymentRefunded { tenant_id, .. }
            | DomainEvent::DisbursementInitiated { tenant_id, .. }
            | DomainEvent::DisbursementSettled { tenant_id, .. }
            | DomainEvent::DisbursementFailed { tenant_id, .. }
            | DomainEvent::StatementGenerated { tenant_id, .. }
            | DomainEvent::StatementSent { tenant_id, .. }
            | DomainEvent::ReconciliationException { tenant_id, .. } => tenant_id,
        }
    }
}
