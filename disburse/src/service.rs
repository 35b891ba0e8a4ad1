//! Disbursement computation and execution.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, instrument, warn};

use nyumbapay_common::{
    Money, OwnerId, Period, TenantDirectory, TenantId,
};
use nyumbapay_events::{DomainEvent, EventPublisher};
use nyumbapay_ledger::{
    Account, AccountRepository, AccountScope, AccountType, EntryDirection, JournalLine,
    LedgerEngine, LedgerEntryType, PostJournalRequest,
};
use nyumbapay_payments::{
    PaymentProvider, ProviderRegistry, ProviderTransferStatus, TransferRequest,
};

use crate::disbursement::{
    DestinationType, Disbursement, DisbursementStatus, TransferResult,
};
use crate::error::DisburseError;
use crate::repository::DisbursementRepository;

/// Percentage of an amount, rounded half away from zero in minor units.
fn percent_of(amount: Money, percent: Decimal) -> Money {
    let value = (Decimal::from(amount.minor_units) * percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Money::new(value.to_i64().unwrap_or(0), amount.currency)
}

/// Request to pay an owner out.
#[derive(Debug, Clone)]
pub struct DisbursementRequest {
    pub tenant_id: TenantId,
    pub owner_id: OwnerId,
    /// Omitted: disburse the full available balance.
    pub amount: Option<Money>,
    pub destination: String,
    pub destination_type: DestinationType,
    pub idempotency_key: String,
}

/// Outcome of `process`.
#[derive(Debug, Clone, PartialEq)]
pub struct DisbursementResult {
    pub disbursement: Disbursement,
    /// True when the idempotency key matched an existing record.
    pub replayed: bool,
}

/// What a disbursement would look like, without executing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub owner_id: OwnerId,
    pub available: Money,
    pub requested: Money,
    pub holdback: Money,
    pub payout: Money,
    pub eligible: bool,
}

/// An owner eligible for payout.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerBalance {
    pub owner_id: OwnerId,
    pub balance: Money,
}

/// Period payout breakdown for an owner, summed from ledger entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    pub owner_id: OwnerId,
    pub period: Period,
    pub gross: Money,
    pub platform_fee: Money,
    pub processing_fee: Money,
    pub maintenance: Money,
    pub other_deductions: Money,
    pub holdback: Money,
    pub net: Money,
}

/// Service tuning.
#[derive(Debug, Clone)]
pub struct DisburseConfig {
    pub provider_timeout: std::time::Duration,
}

impl Default for DisburseConfig {
    fn default() -> Self {
        Self {
            provider_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Executes owner payouts against the ledger and payout providers.
pub struct DisbursementService {
    disbursements: Arc<dyn DisbursementRepository>,
    accounts: Arc<dyn AccountRepository>,
    ledger: Arc<LedgerEngine>,
    providers: Arc<ProviderRegistry>,
    tenants: Arc<dyn TenantDirectory>,
    publisher: Arc<dyn EventPublisher>,
    config: DisburseConfig,
}

impl DisbursementService {
    pub fn new(
        disbursements: Arc<dyn DisbursementRepository>,
        accounts: Arc<dyn AccountRepository>,
        ledger: Arc<LedgerEngine>,
        providers: Arc<ProviderRegistry>,
        tenants: Arc<dyn TenantDirectory>,
        publisher: Arc<dyn EventPublisher>,
        config: DisburseConfig,
    ) -> Self {
        Self {
            disbursements,
            accounts,
            ledger,
            providers,
            tenants,
            publisher,
            config,
        }
    }

    async fn owner_operating_account(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Result<Account, DisburseError> {
        self.accounts
            .find_for_scope(
                tenant_id,
                AccountType::OwnerOperating,
                Some(&AccountScope::Owner(owner_id.clone())),
            )
            .await?
            .ok_or_else(|| DisburseError::OwnerAccountNotFound(owner_id.clone()))
    }

    /// What the owner can be paid right now. Income accrues as debits on
    /// the operating account, so the materialised balance is the
    /// entitlement; a negative balance means nothing is payable.
    async fn available_balance(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
    ) -> Result<(Account, Money), DisburseError> {
        let account = self.owner_operating_account(tenant_id, owner_id).await?;
        let available = Money::new(account.balance_minor_units.max(0), account.currency);
        Ok((account, available))
    }

    /// Execute a payout: persist the record, invoke the provider, then post
    /// the journal and settle the record from the transfer status.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, owner_id = %request.owner_id))]
    pub async fn process(
        &self,
        request: DisbursementRequest,
    ) -> Result<DisbursementResult, DisburseError> {
        if let Some(existing) = self
            .disbursements
            .find_by_idempotency_key(&request.tenant_id, &request.idempotency_key)
            .await?
        {
            info!(disbursement_id = %existing.id, "Idempotent replay, returning stored record");
            return Ok(DisbursementResult {
                disbursement: existing,
                replayed: true,
            });
        }

        let (account, available) = self
            .available_balance(&request.tenant_id, &request.owner_id)
            .await?;
        let requested = request.amount.unwrap_or(available);
        if requested.currency != account.currency {
            return Err(DisburseError::CurrencyMismatch {
                expected: account.currency,
                actual: requested.currency,
            });
        }
        if !requested.is_positive() {
            return Err(DisburseError::NonPositiveAmount);
        }
        if requested.minor_units > available.minor_units {
            return Err(DisburseError::InsufficientBalance {
                requested,
                available,
            });
        }

        let holding = self
            .accounts
            .find_for_scope(&request.tenant_id, AccountType::PlatformHolding, None)
            .await?
            .ok_or(DisburseError::HoldingAccountNotFound)?;

        let mut record = Disbursement::new(
            request.tenant_id.clone(),
            request.owner_id.clone(),
            requested,
            request.destination.clone(),
            request.destination_type,
            request.idempotency_key.clone(),
        );
        self.disbursements.insert(record.clone()).await?;

        let provider = self.providers.resolve(requested.currency)?;
        record.transition_to(DisbursementStatus::Processing)?;
        record.provider_name = Some(provider.name().to_string());
        self.disbursements.update(&record).await?;

        let transfer_request = TransferRequest {
            amount: requested,
            destination: request.destination.clone(),
            description: format!("Owner payout {}", record.id),
            idempotency_key: request.idempotency_key.clone(),
        };
        let transfer = match tokio::time::timeout(
            self.config.provider_timeout,
            provider.create_transfer(&transfer_request),
        )
        .await
        {
            Ok(Ok(transfer)) if transfer.status != ProviderTransferStatus::Failed => transfer,
            Ok(Ok(transfer)) => {
                let reason = transfer
                    .failure_reason
                    .unwrap_or_else(|| "transfer rejected".to_string());
                return self.fail_record(record, reason).await;
            }
            Ok(Err(e)) => {
                return self.fail_record(record, e.to_string()).await;
            }
            Err(_) => {
                return self
                    .fail_record(record, "transfer timed out".to_string())
                    .await;
            }
        };

        // Provider acknowledged: move the funds in the ledger.
        let journal = self
            .ledger
            .post_journal(PostJournalRequest {
                tenant_id: request.tenant_id.clone(),
                effective_date: Utc::now(),
                created_by: "disbursement-service".to_string(),
                lines: vec![
                    JournalLine::debit(
                        holding.id.clone(),
                        LedgerEntryType::Disbursement,
                        requested,
                        format!("Disbursement {} to {}", record.id, request.owner_id),
                    ),
                    JournalLine::credit(
                        account.id.clone(),
                        LedgerEntryType::Disbursement,
                        requested,
                        format!("Disbursement {} payout", record.id),
                    ),
                ],
            })
            .await;
        let journal = match journal {
            Ok(journal) => journal,
            Err(e) => {
                // The provider already moved money; never fail silently.
                warn!(disbursement_id = %record.id, error = %e, "Journal posting failed after transfer");
                record.needs_reconciliation = true;
                record.transfer_id = Some(transfer.transfer_id.clone());
                self.disbursements.update(&record).await?;
                return Err(e.into());
            }
        };

        record.transfer_id = Some(transfer.transfer_id.clone());
        record.initiated_at = Some(Utc::now());
        record.estimated_arrival = transfer.estimated_arrival;
        record.ledger_entry_id = journal.entries.first().map(|e| e.id.clone());
        let next = match transfer.status {
            ProviderTransferStatus::Paid => DisbursementStatus::Paid,
            ProviderTransferStatus::InTransit => DisbursementStatus::InTransit,
            ProviderTransferStatus::Pending | ProviderTransferStatus::Failed => {
                DisbursementStatus::Processing
            }
        };
        if next != record.status {
            record.transition_to(next)?;
        }
        self.disbursements.update(&record).await?;

        self.publisher
            .publish(DomainEvent::DisbursementInitiated {
                tenant_id: record.tenant_id.clone(),
                disbursement_id: record.id.clone(),
                owner_id: record.owner_id.clone(),
                amount: record.amount,
            })
            .await?;
        if record.status == DisbursementStatus::Paid {
            self.publisher
                .publish(DomainEvent::DisbursementSettled {
                    tenant_id: record.tenant_id.clone(),
                    disbursement_id: record.id.clone(),
                    owner_id: record.owner_id.clone(),
                    amount: record.amount,
                })
                .await?;
        }

        info!(
            disbursement_id = %record.id,
            transfer_id = ?record.transfer_id,
            status = ?record.status,
            "Disbursement executed"
        );
        Ok(DisbursementResult {
            disbursement: record,
            replayed: false,
        })
    }

    async fn fail_record(
        &self,
        mut record: Disbursement,
        reason: String,
    ) -> Result<DisbursementResult, DisburseError> {
        warn!(disbursement_id = %record.id, reason = %reason, "Disbursement failed before settlement");
        record.failure_reason = Some(reason.clone());
        record.transition_to(DisbursementStatus::Failed)?;
        self.disbursements.update(&record).await?;
        self.publisher
            .publish(DomainEvent::DisbursementFailed {
                tenant_id: record.tenant_id.clone(),
                disbursement_id: record.id.clone(),
                owner_id: record.owner_id.clone(),
                reason,
            })
            .await?;
        Ok(DisbursementResult {
            disbursement: record,
            replayed: false,
        })
    }

    /// Preview a payout without executing it.
    pub async fn preview(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
        amount: Option<Money>,
    ) -> Result<Preview, DisburseError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await
            .ok_or_else(|| DisburseError::TenantNotFound(tenant_id.clone()))?;
        let (_, available) = self.available_balance(tenant_id, owner_id).await?;
        let requested = amount.unwrap_or(available);
        let holdback = percent_of(requested, tenant.payout.holdback_percent);
        let payout = Money::new(
            (requested.minor_units - holdback.minor_units).max(0),
            requested.currency,
        );
        let eligible = requested.is_positive()
            && requested.minor_units <= available.minor_units
            && requested.minor_units >= tenant.payout.minimum_disbursement.minor_units;
        Ok(Preview {
            owner_id: owner_id.clone(),
            available,
            requested,
            holdback,
            payout,
            eligible,
        })
    }

    /// Owners whose operating balance meets `min_balance`.
    pub async fn eligible_owners(
        &self,
        tenant_id: &TenantId,
        min_balance: Money,
    ) -> Result<Vec<OwnerBalance>, DisburseError> {
        let accounts = self.accounts.list_for_tenant(tenant_id).await?;
        let mut owners: Vec<OwnerBalance> = accounts
            .into_iter()
            .filter(|account| account.account_type == AccountType::OwnerOperating)
            .filter_map(|account| match &account.scope {
                Some(AccountScope::Owner(owner_id))
                    if account.balance_minor_units >= min_balance.minor_units
                        && account.balance_minor_units > 0 =>
                {
                    Some(OwnerBalance {
                        owner_id: owner_id.clone(),
                        balance: account.balance(),
                    })
                }
                _ => None,
            })
            .collect();
        owners.sort_by(|a, b| a.owner_id.as_str().cmp(b.owner_id.as_str()));
        Ok(owners)
    }

    /// Sum the owner's operating entries by type over a period.
    #[instrument(skip(self))]
    pub async fn breakdown(
        &self,
        tenant_id: &TenantId,
        owner_id: &OwnerId,
        period: Period,
    ) -> Result<Breakdown, DisburseError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await
            .ok_or_else(|| DisburseError::TenantNotFound(tenant_id.clone()))?;
        let account = self.owner_operating_account(tenant_id, owner_id).await?;
        let view = self
            .ledger
            .statement(&account.id, tenant_id, period.start, period.end)
            .await?;

        let currency = account.currency;
        let mut gross = 0i64;
        let mut platform_fee = 0i64;
        let mut processing_fee = 0i64;
        let mut maintenance = 0i64;
        let mut other = 0i64;
        let mut holdback = 0i64;
        for entry in &view.entries {
            let minor = entry.amount.minor_units;
            match (entry.entry_type, entry.direction) {
                (LedgerEntryType::Payment | LedgerEntryType::Deposit, EntryDirection::Debit) => {
                    gross += minor
                }
                (LedgerEntryType::PlatformFee, EntryDirection::Credit) => platform_fee += minor,
                (LedgerEntryType::ProcessingFee, EntryDirection::Credit) => {
                    processing_fee += minor
                }
                (LedgerEntryType::Maintenance, EntryDirection::Credit) => maintenance += minor,
                (LedgerEntryType::Holdback, EntryDirection::Credit) => holdback += minor,
                (
                    LedgerEntryType::Deduction
                    | LedgerEntryType::Refund
                    | LedgerEntryType::Adjustment,
                    EntryDirection::Credit,
                ) => other += minor,
                _ => {}
            }
        }
        // Policy holdback applies on top of anything already posted.
        holdback += percent_of(Money::new(gross, currency), tenant.payout.holdback_percent)
            .minor_units;

        let net = (gross - platform_fee - processing_fee - maintenance - other - holdback).max(0);
        Ok(Breakdown {
            owner_id: owner_id.clone(),
            period,
            gross: Money::new(gross, currency),
            platform_fee: Money::new(platform_fee, currency),
            processing_fee: Money::new(processing_fee, currency),
            maintenance: Money::new(maintenance, currency),
            other_deductions: Money::new(other, currency),
            holdback: Money::new(holdback, currency),
            net: Money::new(net, currency),
        })
    }

    /// Apply a provider result callback, looked up by transfer id. Timeout
    /// callbacks flag the record for reconciliation instead of guessing.
    #[instrument(skip(self))]
    pub async fn handle_transfer_result(
        &self,
        transfer_id: &str,
        result: TransferResult,
    ) -> Result<(), DisburseError> {
        let Some(mut record) = self.disbursements.find_by_transfer_id(transfer_id).await? else {
            info!(transfer_id, "Result callback for unknown transfer, acknowledging");
            return Ok(());
        };

        match result {
            TransferResult::Paid => {
                if record.status == DisbursementStatus::Paid {
                    return Ok(());
                }
                record.transition_to(DisbursementStatus::Paid)?;
                self.disbursements.update(&record).await?;
                self.publisher
                    .publish(DomainEvent::DisbursementSettled {
                        tenant_id: record.tenant_id.clone(),
                        disbursement_id: record.id.clone(),
                        owner_id: record.owner_id.clone(),
                        amount: record.amount,
                    })
                    .await?;
            }
            TransferResult::Failed(reason) => {
                if record.status == DisbursementStatus::Failed {
                    return Ok(());
                }
                record.failure_reason = Some(reason.clone());
                record.needs_reconciliation = true;
                record.transition_to(DisbursementStatus::Failed)?;
                self.disbursements.update(&record).await?;
                self.publisher
                    .publish(DomainEvent::DisbursementFailed {
                        tenant_id: record.tenant_id.clone(),
                        disbursement_id: record.id.clone(),
                        owner_id: record.owner_id.clone(),
                        reason,
                    })
                    .await?;
            }
            TransferResult::Timeout => {
                record.needs_reconciliation = true;
                self.disbursements.update(&record).await?;
            }
        }
        Ok(())
    }
}
