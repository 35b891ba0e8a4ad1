//! Reconciliation engine.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use nyumbapay_common::{AccountId, Money, Period, TenantId};
use nyumbapay_events::{DomainEvent, EventPublisher, ExceptionSeverity};
use nyumbapay_ledger::{AccountRepository, LedgerEngine};
use nyumbapay_payments::{
    PaymentIntentRepository, PaymentOrchestrator, PaymentProvider, PaymentStatus,
    ProviderPaymentStatus, ProviderRegistry, ProviderWebhookEvent,
};

use crate::bank::{BankTransaction, BankTransactionDirection};
use crate::error::ReconcileError;
use crate::matching::{match_transactions, MatchConfig, MatchOutcome, PaymentMatch};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Processing intents older than this are re-queried at the provider.
    pub stale_after: Duration,
    pub matching: MatchConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(30),
            matching: MatchConfig::default(),
        }
    }
}

/// One exception found during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationExceptionRecord {
    pub account_id: Option<AccountId>,
    pub code: String,
    pub severity: ExceptionSeverity,
    pub detail: String,
}

/// Report of a ledger self-verification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCheckReport {
    pub tenant_id: TenantId,
    pub accounts_checked: usize,
    pub exceptions: Vec<ReconciliationExceptionRecord>,
}

impl LedgerCheckReport {
    pub fn is_clean(&self) -> bool {
        self.exceptions.is_empty()
    }
}

/// Report of a provider status sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSyncReport {
    pub tenant_id: TenantId,
    pub checked: usize,
    pub updated: usize,
}

/// Outcome of one bank reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationRecord {
    pub id: String,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub period: Period,
    pub opening_balance: Money,
    pub closing_balance: Money,
    /// Closing balance the ledger expects.
    pub expected_balance: Money,
    pub discrepancy_minor_units: i64,
    pub matched_items: Vec<PaymentMatch>,
    pub unmatched_payments: Vec<PaymentMatch>,
    pub unmatched_bank_transactions: Vec<BankTransaction>,
    pub exceptions: Vec<ReconciliationExceptionRecord>,
}

/// Reads the ledger, payments and bank feeds; emits exception events.
pub struct ReconciliationEngine {
    ledger: Arc<LedgerEngine>,
    accounts: Arc<dyn AccountRepository>,
    intents: Arc<dyn PaymentIntentRepository>,
    orchestrator: Arc<PaymentOrchestrator>,
    providers: Arc<ProviderRegistry>,
    publisher: Arc<dyn EventPublisher>,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<LedgerEngine>,
        accounts: Arc<dyn AccountRepository>,
        intents: Arc<dyn PaymentIntentRepository>,
        orchestrator: Arc<PaymentOrchestrator>,
        providers: Arc<ProviderRegistry>,
        publisher: Arc<dyn EventPublisher>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            ledger,
            accounts,
            intents,
            orchestrator,
            providers,
            publisher,
            config,
        }
    }

    async fn publish_exception(
        &self,
        tenant_id: &TenantId,
        record: &ReconciliationExceptionRecord,
    ) -> Result<(), ReconcileError> {
        self.publisher
            .publish(DomainEvent::ReconciliationException {
                tenant_id: tenant_id.clone(),
                account_id: record.account_id.clone(),
                code: record.code.clone(),
                severity: record.severity,
                detail: record.detail.clone(),
            })
            .await?;
        Ok(())
    }

    /// (a) Ledger self-verification: materialised balances and sequence
    /// integrity across every account of the tenant.
    #[instrument(skip(self))]
    pub async fn verify_ledger(&self, tenant_id: &TenantId) -> Result<LedgerCheckReport, ReconcileError> {
        let accounts = self.accounts.list_for_tenant(tenant_id).await?;
        let mut exceptions = Vec::new();

        for account in &accounts {
            let balance = self
                .ledger
                .verify_account_balance(&account.id, tenant_id)
                .await?;
            if !balance.valid {
                exceptions.push(ReconciliationExceptionRecord {
                    account_id: Some(account.id.clone()),
                    code: "balance_drift".to_string(),
                    severity: ExceptionSeverity::Warning,
                    detail: format!(
                        "materialised {} differs from computed {} by {} minor units",
                        balance.materialised, balance.computed, balance.discrepancy_minor_units
                    ),
                });
            }

            let sequence = self.ledger.verify_sequence(&account.id, tenant_id).await?;
            if !sequence.gaps.is_empty() {
                exceptions.push(ReconciliationExceptionRecord {
                    account_id: Some(account.id.clone()),
                    code: "sequence_gap".to_string(),
                    severity: ExceptionSeverity::Critical,
                    detail: format!("missing sequence numbers {:?}", sequence.gaps),
                });
            }
            if !sequence.duplicates.is_empty() {
                exceptions.push(ReconciliationExceptionRecord {
                    account_id: Some(account.id.clone()),
                    code: "sequence_duplicate".to_string(),
                    severity: ExceptionSeverity::Critical,
                    detail: format!("duplicated sequence numbers {:?}", sequence.duplicates),
                });
            }
        }

        for exception in &exceptions {
            warn!(code = %exception.code, detail = %exception.detail, "Ledger exception");
            self.publish_exception(tenant_id, exception).await?;
        }

        Ok(LedgerCheckReport {
            tenant_id: tenant_id.clone(),
            accounts_checked: accounts.len(),
            exceptions,
        })
    }

    /// (b) Provider status sync: re-query intents stuck in `Processing` and
    /// drive authoritative answers through the webhook path.
    #[instrument(skip(self))]
    pub async fn sync_provider_status(
        &self,
        tenant_id: &TenantId,
    ) -> Result<ProviderSyncReport, ReconcileError> {
        let cutoff = Utc::now() - self.config.stale_after;
        let stale = self
            .intents
            .list_processing_older_than(tenant_id, cutoff)
            .await?;

        let mut updated = 0;
        for intent in &stale {
            let (Some(provider_name), Some(external_id)) =
                (intent.provider_name.as_deref(), intent.external_id.as_deref())
            else {
                continue;
            };
            let provider = match self.providers.get_by_name(provider_name) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(provider = provider_name, error = %e, "Cannot sync intent");
                    continue;
                }
            };
            let authoritative = match provider.get_payment_intent_status(external_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(external_id, error = %e, "Provider status query failed");
                    continue;
                }
            };

            if provider_status_agrees(intent.status, authoritative.status) {
                continue;
            }

            info!(
                intent_id = %intent.id,
                current = ?intent.status,
                authoritative = ?authoritative.status,
                "Reconciling stale intent from provider"
            );
            self.orchestrator
                .handle_webhook(ProviderWebhookEvent {
                    provider: provider_name.to_string(),
                    external_id: external_id.to_string(),
                    status: authoritative.status,
                    receipt_url: authoritative.receipt_url,
                    failure_reason: authoritative.failure_reason,
                })
                .await?;
            updated += 1;
        }

        Ok(ProviderSyncReport {
            tenant_id: tenant_id.clone(),
            checked: stale.len(),
            updated,
        })
    }

    /// (c) Bank-transaction matching over a statement period.
    #[instrument(skip(self, transactions), fields(transactions = transactions.len()))]
    pub async fn match_bank_transactions(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        period: Period,
        opening_balance: Money,
        transactions: Vec<BankTransaction>,
    ) -> Result<ReconciliationRecord, ReconcileError> {
        let payments = self
            .intents
            .list_paid_in_period(
                tenant_id,
                period.start,
                period.end,
                &[
                    PaymentStatus::Succeeded,
                    PaymentStatus::PartiallyRefunded,
                    PaymentStatus::Refunded,
                ],
            )
            .await?;

        let result = match_transactions(&payments, &transactions, &self.config.matching);

        let mut credits = 0i64;
        let mut debits = 0i64;
        for transaction in &transactions {
            match transaction.direction {
                BankTransactionDirection::Credit => credits += transaction.amount.minor_units,
                BankTransactionDirection::Debit => debits += transaction.amount.minor_units,
            }
        }
        let closing_balance = Money::new(
            opening_balance.minor_units + credits - debits,
            opening_balance.currency,
        );
        let expected_balance = self
            .ledger
            .balance_as_of(account_id, tenant_id, period.end)
            .await?;
        let discrepancy = closing_balance.minor_units - expected_balance.minor_units;

        let mut exceptions = Vec::new();
        let (matched, unmatched): (Vec<PaymentMatch>, Vec<PaymentMatch>) = result
            .matches
            .into_iter()
            .partition(|m| m.outcome != MatchOutcome::Unmatched);

        for m in matched.iter().filter(|m| m.outcome == MatchOutcome::Ambiguous) {
            exceptions.push(ReconciliationExceptionRecord {
                account_id: Some(account_id.clone()),
                code: "ambiguous_match".to_string(),
                severity: ExceptionSeverity::Warning,
                detail: format!(
                    "payment {} consumed bank transaction {} at score {}",
                    m.payment_intent_id,
                    m.bank_transaction_id.as_deref().unwrap_or("?"),
                    m.score
                ),
            });
        }
        for transaction in &result.unmatched_bank_transactions {
            exceptions.push(ReconciliationExceptionRecord {
                account_id: Some(account_id.clone()),
                code: "unmatched_bank_transaction".to_string(),
                severity: ExceptionSeverity::Warning,
                detail: format!(
                    "bank transaction {} of {} has no matching payment",
                    transaction.id, transaction.amount
                ),
            });
        }
        if discrepancy != 0 {
            exceptions.push(ReconciliationExceptionRecord {
                account_id: Some(account_id.clone()),
                code: "bank_balance_discrepancy".to_string(),
                severity: ExceptionSeverity::Critical,
                detail: format!(
                    "bank closing {} differs from ledger {} by {} minor units",
                    closing_balance, expected_balance, discrepancy
                ),
            });
        }
        for exception in &exceptions {
            self.publish_exception(tenant_id, exception).await?;
        }

        Ok(ReconciliationRecord {
            id: format!("rec_{}", Uuid::now_v7().simple()),
            tenant_id: tenant_id.clone(),
            account_id: account_id.clone(),
            period,
            opening_balance,
            closing_balance,
            expected_balance,
            discrepancy_minor_units: discrepancy,
            matched_items: matched,
            unmatched_payments: unmatched,
            unmatched_bank_transactions: result.unmatched_bank_transactions,
            exceptions,
        })
    }
}

/// Whether the stored intent status already reflects the provider's answer.
fn provider_status_agrees(current: PaymentStatus, authoritative: ProviderPaymentStatus) -> bool {
    matches!(
        (current, authoritative),
        (PaymentStatus::Pending, ProviderPaymentStatus::Pending)
            | (PaymentStatus::Processing, ProviderPaymentStatus::Pending)
            | (PaymentStatus::Processing, ProviderPaymentStatus::Processing)
            | (PaymentStatus::RequiresAction, ProviderPaymentStatus::RequiresAction)
            | (PaymentStatus::Succeeded, ProviderPaymentStatus::Succeeded)
            | (PaymentStatus::Failed, ProviderPaymentStatus::Failed)
            | (PaymentStatus::Cancelled, ProviderPaymentStatus::Cancelled)
    )
}
