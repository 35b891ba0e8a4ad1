//! Ledger projection subscribers.
//!
//! The orchestrator never posts ledger entries itself; these subscribers
//! consume payment events off the outbox and post the corresponding
//! journals. Delivery is at-least-once, so every projection is idempotent
//! against the entries already recorded for the payment intent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use nyumbapay_common::{CustomerId, Money, TenantId};
use nyumbapay_events::{DomainEvent, EventSubscriber, SinkError};
use nyumbapay_ledger::{
    Account, AccountRepository, AccountScope, AccountType, EntryDirection, EntryReferences,
    JournalLine, LedgerEngine, LedgerEntryType, LedgerRepository, PostJournalRequest,
};

/// Posts payment and refund journals from domain events.
pub struct LedgerProjector {
    ledger: Arc<LedgerEngine>,
    accounts: Arc<dyn AccountRepository>,
    entries: Arc<dyn LedgerRepository>,
}

impl LedgerProjector {
    pub fn new(
        ledger: Arc<LedgerEngine>,
        accounts: Arc<dyn AccountRepository>,
        entries: Arc<dyn LedgerRepository>,
    ) -> Self {
        Self {
            ledger,
            accounts,
            entries,
        }
    }

    async fn platform_account(
        &self,
        tenant_id: &TenantId,
        account_type: AccountType,
    ) -> Result<Account, SinkError> {
        self.accounts
            .find_for_scope(tenant_id, account_type, None)
            .await
            .map_err(|e| SinkError(e.to_string()))?
            .ok_or_else(|| {
                SinkError(format!(
                    "tenant {tenant_id} has no {account_type:?} account; bootstrap first"
                ))
            })
    }

    /// The customer's liability account, opened on first use.
    async fn customer_account(
        &self,
        tenant_id: &TenantId,
        customer_id: &CustomerId,
        currency: nyumbapay_common::Currency,
    ) -> Result<Account, SinkError> {
        let scope = AccountScope::Customer(customer_id.clone());
        if let Some(account) = self
            .accounts
            .find_for_scope(tenant_id, AccountType::CustomerLiability, Some(&scope))
            .await
            .map_err(|e| SinkError(e.to_string()))?
        {
            return Ok(account);
        }
        let account = Account::new(tenant_id.clone(), AccountType::CustomerLiability, currency)
            .with_scope(scope);
        self.accounts
            .create(account.clone())
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        info!(account_id = %account.id, customer_id = %customer_id, "Opened customer liability account");
        Ok(account)
    }

    async fn project_success(
        &self,
        tenant_id: &TenantId,
        payment_intent_id: &nyumbapay_common::PaymentIntentId,
        customer_id: &CustomerId,
        amount: Money,
        platform_fee: Money,
        net_amount: Money,
        paid_at: chrono::DateTime<Utc>,
    ) -> Result<(), SinkError> {
        let existing = self
            .entries
            .entries_for_payment_intent(tenant_id, payment_intent_id)
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        if existing
            .iter()
            .any(|e| e.entry_type == LedgerEntryType::Payment)
        {
            debug!(payment_intent_id = %payment_intent_id, "Success journal already posted");
            return Ok(());
        }

        let customer = self
            .customer_account(tenant_id, customer_id, amount.currency)
            .await?;
        let holding = self
            .platform_account(tenant_id, AccountType::PlatformHolding)
            .await?;
        let references = EntryReferences::for_payment_intent(payment_intent_id.clone());

        let mut lines = vec![
            JournalLine::debit(
                customer.id.clone(),
                LedgerEntryType::Payment,
                amount,
                format!("Payment {payment_intent_id}"),
            )
            .with_references(references.clone()),
            JournalLine::credit(
                holding.id.clone(),
                LedgerEntryType::Payment,
                net_amount,
                format!("Payment {payment_intent_id} net"),
            )
            .with_references(references.clone()),
        ];
        if platform_fee.is_positive() {
            let revenue = self
                .platform_account(tenant_id, AccountType::PlatformRevenue)
                .await?;
            lines.push(
                JournalLine::credit(
                    revenue.id.clone(),
                    LedgerEntryType::PlatformFee,
                    platform_fee,
                    format!("Payment {payment_intent_id} platform fee"),
                )
                .with_references(references),
            );
        }

        self.ledger
            .post_journal(PostJournalRequest {
                tenant_id: tenant_id.clone(),
                effective_date: paid_at,
                created_by: "ledger-projector".to_string(),
                lines,
            })
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        Ok(())
    }

    async fn project_refund(
        &self,
        tenant_id: &TenantId,
        payment_intent_id: &nyumbapay_common::PaymentIntentId,
        customer_id: &CustomerId,
        amount: Money,
        refunded_total: Money,
        original_amount: Money,
        original_platform_fee: Money,
    ) -> Result<(), SinkError> {
        // Dedupe against what is already in the ledger: the sum of refund
        // credits posted for this intent must stay below the running total
        // the event reports.
        let existing = self
            .entries
            .entries_for_payment_intent(tenant_id, payment_intent_id)
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        let already_refunded: i64 = existing
            .iter()
            .filter(|e| {
                e.entry_type == LedgerEntryType::Refund && e.direction == EntryDirection::Credit
            })
            .map(|e| e.amount.minor_units)
            .sum();
        if already_refunded >= refunded_total.minor_units {
            debug!(payment_intent_id = %payment_intent_id, "Refund journal already posted");
            return Ok(());
        }

        // Pro-rata fee share, half away from zero; the rounding remainder
        // lands on the holding line so the journal still balances.
        let fee_share = (Decimal::from(original_platform_fee.minor_units)
            * Decimal::from(amount.minor_units)
            / Decimal::from(original_amount.minor_units))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0);
        let net_share = amount.minor_units - fee_share;

        let customer = self
            .customer_account(tenant_id, customer_id, amount.currency)
            .await?;
        let holding = self
            .platform_account(tenant_id, AccountType::PlatformHolding)
            .await?;
        let references = EntryReferences::for_payment_intent(payment_intent_id.clone());

        let mut lines = vec![JournalLine::credit(
            customer.id.clone(),
            LedgerEntryType::Refund,
            amount,
            format!("Refund for {payment_intent_id}"),
        )
        .with_references(references.clone())];
        if net_share > 0 {
            lines.push(
                JournalLine::debit(
                    holding.id.clone(),
                    LedgerEntryType::Refund,
                    Money::new(net_share, amount.currency),
                    format!("Refund for {payment_intent_id} net"),
                )
                .with_references(references.clone()),
            );
        }
        if fee_share > 0 {
            let revenue = self
                .platform_account(tenant_id, AccountType::PlatformRevenue)
                .await?;
            lines.push(
                JournalLine::debit(
                    revenue.id.clone(),
                    LedgerEntryType::Refund,
                    Money::new(fee_share, amount.currency),
                    format!("Refund for {payment_intent_id} fee share"),
                )
                .with_references(references),
            );
        }

        self.ledger
            .post_journal(PostJournalRequest {
                tenant_id: tenant_id.clone(),
                effective_date: Utc::now(),
                created_by: "ledger-projector".to_string(),
                lines,
            })
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for LedgerProjector {
    fn name(&self) -> &'static str {
        "ledger-projector"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), SinkError> {
        match event {
            DomainEvent::PaymentSucceeded {
                tenant_id,
                payment_intent_id,
                customer_id,
                amount,
                platform_fee,
                net_amount,
                paid_at,
                ..
            } => {
                self.project_success(
                    tenant_id,
                    payment_intent_id,
                    customer_id,
                    *amount,
                    *platform_fee,
                    *net_amount,
                    *paid_at,
                )
                .await
            }
            DomainEvent::PaymentRefunded {
                tenant_id,
                payment_intent_id,
                customer_id,
                amount,
                refunded_total,
                original_amount,
                original_platform_fee,
                ..
            } => {
                self.project_refund(
                    tenant_id,
                    payment_intent_id,
                    customer_id,
                    *amount,
                    *refunded_total,
                    *original_amount,
                    *original_platform_fee,
                )
                .await
            }
            _ => Ok(()),
        }
    }
}
