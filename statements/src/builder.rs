//! Statement generation and delivery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use nyumbapay_common::{
    AccountId, CustomerId, Money, OwnerId, Period, PropertyId, StatementId, TenantId,
};
use nyumbapay_events::{DomainEvent, EventPublisher};
use nyumbapay_ledger::{AccountRepository, EntryDirection, LedgerEngine, LedgerEntryType};

use crate::error::StatementError;
use crate::repository::StatementRepository;
use crate::statement::{CategorySummary, LineItem, Statement, StatementStatus, StatementType};

/// Request to materialise a statement.
#[derive(Debug, Clone)]
pub struct GenerateStatementRequest {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub statement_type: StatementType,
    pub owner_id: Option<OwnerId>,
    pub customer_id: Option<CustomerId>,
    pub property_id: Option<PropertyId>,
    pub period: Period,
}

/// Builds, delivers and tracks statements.
pub struct StatementBuilder {
    statements: Arc<dyn StatementRepository>,
    ledger: Arc<LedgerEngine>,
    accounts: Arc<dyn AccountRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl StatementBuilder {
    pub fn new(
        statements: Arc<dyn StatementRepository>,
        ledger: Arc<LedgerEngine>,
        accounts: Arc<dyn AccountRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            statements,
            ledger,
            accounts,
            publisher,
        }
    }

    /// Materialise a statement for the period: opening balance, line items
    /// with a running balance, totals and category summaries.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, account_id = %request.account_id))]
    pub async fn generate(
        &self,
        request: GenerateStatementRequest,
    ) -> Result<Statement, StatementError> {
        if self
            .statements
            .find_for_period(
                &request.tenant_id,
                &request.account_id,
                request.statement_type,
                request.period.start,
                request.period.end,
            )
            .await?
            .is_some()
        {
            return Err(StatementError::DuplicateStatement);
        }

        let account = self
            .accounts
            .get(&request.tenant_id, &request.account_id)
            .await?
            .ok_or_else(|| StatementError::AccountNotFound(request.account_id.clone()))?;

        let view = self
            .ledger
            .statement(
                &request.account_id,
                &request.tenant_id,
                request.period.start,
                request.period.end,
            )
            .await?;

        let mut running = view.opening_balance.minor_units;
        let mut line_items = Vec::with_capacity(view.entries.len());
        let mut categories: HashMap<LedgerEntryType, (i64, i64)> = HashMap::new();
        for entry in &view.entries {
            running += entry.signed_amount();
            let (debit, credit) = match entry.direction {
                EntryDirection::Debit => (Some(entry.amount), None),
                EntryDirection::Credit => (None, Some(entry.amount)),
            };
            let totals = categories.entry(entry.entry_type).or_insert((0, 0));
            match entry.direction {
                EntryDirection::Debit => totals.0 += entry.amount.minor_units,
                EntryDirection::Credit => totals.1 += entry.amount.minor_units,
            }
            let reference = entry
                .references
                .payment_intent_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| entry.journal_id.to_string());
            line_items.push(LineItem {
                date: entry.effective_date,
                entry_type: entry.entry_type,
                description: entry.description.clone(),
                reference,
                debit,
                credit,
                balance: Money::new(running, account.currency),
            });
        }

        let mut category_summaries: Vec<CategorySummary> = categories
            .into_iter()
            .map(|(entry_type, (debits, credits))| CategorySummary {
                entry_type,
                total_debits: Money::new(debits, account.currency),
                total_credits: Money::new(credits, account.currency),
                net: Money::new(debits - credits, account.currency),
            })
            .collect();
        category_summaries.sort_by(|a, b| {
            b.net
                .minor_units
                .abs()
                .cmp(&a.net.minor_units.abs())
                .then_with(|| format!("{:?}", a.entry_type).cmp(&format!("{:?}", b.entry_type)))
        });

        let statement = Statement {
            id: StatementId::new(),
            tenant_id: request.tenant_id.clone(),
            statement_type: request.statement_type,
            status: StatementStatus::Generated,
            account_id: request.account_id.clone(),
            owner_id: request.owner_id,
            customer_id: request.customer_id,
            property_id: request.property_id,
            period: request.period,
            currency: account.currency,
            opening_balance: view.opening_balance,
            closing_balance: Money::new(running, account.currency),
            total_debits: view.total_debits,
            total_credits: view.total_credits,
            line_items,
            category_summaries,
            generated_at: Utc::now(),
            sent_at: None,
            viewed_at: None,
            delivery_destination: None,
        };

        self.statements.insert(statement.clone()).await?;
        self.publisher
            .publish(DomainEvent::StatementGenerated {
                tenant_id: statement.tenant_id.clone(),
                statement_id: statement.id.clone(),
                account_id: statement.account_id.clone(),
                period_start: statement.period.start,
                period_end: statement.period.end,
            })
            .await?;

        info!(
            statement_id = %statement.id,
            lines = statement.line_items.len(),
            "Statement generated"
        );
        Ok(statement)
    }

    /// Deliver a generated statement to a recipient.
    #[instrument(skip(self))]
    pub async fn deliver(
        &self,
        tenant_id: &TenantId,
        statement_id: &StatementId,
        recipient: &str,
    ) -> Result<Statement, StatementError> {
        let mut statement = self
            .statements
            .get(tenant_id, statement_id)
            .await?
            .ok_or_else(|| StatementError::StatementNotFound(statement_id.clone()))?;
        statement.transition_to(StatementStatus::Sent)?;
        statement.delivery_destination = Some(recipient.to_string());
        self.statements.update(&statement).await?;
        self.publisher
            .publish(DomainEvent::StatementSent {
                tenant_id: statement.tenant_id.clone(),
                statement_id: statement.id.clone(),
                destination: recipient.to_string(),
            })
            .await?;
        Ok(statement)
    }

    /// Record that the recipient opened the statement.
    pub async fn mark_viewed(
        &self,
        tenant_id: &TenantId,
        statement_id: &StatementId,
    ) -> Result<Statement, StatementError> {
        let mut statement = self
            .statements
            .get(tenant_id, statement_id)
            .await?
            .ok_or_else(|| StatementError::StatementNotFound(statement_id.clone()))?;
        statement.transition_to(StatementStatus::Viewed)?;
        self.statements.update(&statement).await?;
        Ok(statement)
    }

    /// Fetch a statement.
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        statement_id: &StatementId,
    ) -> Result<Option<Statement>, StatementError> {
        self.statements.get(tenant_id, statement_id).await
    }
}
