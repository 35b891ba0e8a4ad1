//! End-to-end reconciliation engine tests over the in-memory stores.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use nyumbapay_common::{
    Currency, CustomerId, Money, PayoutSettings, Period, StaticTenantDirectory, TenantId,
    TenantView,
};
use nyumbapay_events::{ExceptionSeverity, MemoryPublisher};
use nyumbapay_ledger::{
    Account, AccountRepository, AccountType, InMemoryLedgerStore, JournalLine, LedgerEngine,
    LedgerEntryType, PostJournalRequest,
};
use nyumbapay_payments::{
    CreatePaymentRequest, InMemoryPaymentIntentRepository, MpesaSandbox, OrchestratorConfig,
    PaymentIntentRepository, PaymentOrchestrator, PaymentProvider, PaymentStatus, PaymentType,
    ProviderPaymentStatus, ProviderRegistry, ProviderWebhookEvent,
};
use nyumbapay_reconcile::{
    BankTransaction, BankTransactionDirection, MatchOutcome, ReconcileConfig, ReconciliationEngine,
};

struct Fixture {
    tenant: TenantId,
    store: Arc<InMemoryLedgerStore>,
    ledger: Arc<LedgerEngine>,
    intents: Arc<InMemoryPaymentIntentRepository>,
    orchestrator: Arc<PaymentOrchestrator>,
    mpesa: Arc<MpesaSandbox>,
    publisher: Arc<MemoryPublisher>,
    engine: ReconciliationEngine,
}

fn fixture() -> Fixture {
    let tenant = TenantId::new("tn-1");
    let store = Arc::new(InMemoryLedgerStore::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let ledger = Arc::new(LedgerEngine::new(
        store.clone(),
        store.clone(),
        publisher.clone(),
    ));

    let registry = Arc::new(ProviderRegistry::new());
    let mpesa = Arc::new(MpesaSandbox::new("cbsec_test"));
    registry.register(mpesa.clone());

    let tenants = Arc::new(StaticTenantDirectory::new());
    tenants.upsert(TenantView {
        tenant_id: tenant.clone(),
        platform_fee_percent: dec!(5),
        payout: PayoutSettings::defaults(Currency::KES),
    });

    let intents = Arc::new(InMemoryPaymentIntentRepository::new());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        intents.clone(),
        registry.clone(),
        tenants,
        publisher.clone(),
        OrchestratorConfig::default(),
    ));

    let engine = ReconciliationEngine::new(
        ledger.clone(),
        store.clone(),
        intents.clone(),
        orchestrator.clone(),
        registry,
        publisher.clone(),
        ReconcileConfig::default(),
    );

    Fixture {
        tenant,
        store,
        ledger,
        intents,
        orchestrator,
        mpesa,
        publisher,
        engine,
    }
}

fn kes(minor: i64) -> Money {
    Money::new(minor, Currency::KES)
}

async fn settled_payment(f: &Fixture, amount: i64, key: &str, description: &str) -> nyumbapay_payments::PaymentIntent {
    let intent = f
        .orchestrator
        .create_payment(CreatePaymentRequest {
            tenant_id: f.tenant.clone(),
            customer_id: CustomerId::new("cust-1"),
            lease_id: None,
            payment_type: PaymentType::Rent,
            amount: kes(amount),
            description: description.to_string(),
            statement_descriptor: "NYUMBAPAY RENT".to_string(),
            idempotency_key: key.to_string(),
            payment_method: None,
            metadata: HashMap::new(),
        })
        .await
        .unwrap();

    f.orchestrator
        .handle_webhook(ProviderWebhookEvent {
            provider: f.mpesa.name().to_string(),
            external_id: intent.external_id.clone().unwrap(),
            status: ProviderPaymentStatus::Succeeded,
            receipt_url: Some(format!("RCPT{key}")),
            failure_reason: None,
        })
        .await
        .unwrap();

    f.orchestrator
        .get_intent(&f.tenant, &intent.id)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn clean_ledger_verifies_without_exceptions() {
    let f = fixture();
    let a = Account::new(f.tenant.clone(), AccountType::CustomerLiability, Currency::KES);
    let b = Account::new(f.tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    f.store.create(a.clone()).await.unwrap();
    f.store.create(b.clone()).await.unwrap();

    f.ledger
        .post_journal(PostJournalRequest {
            tenant_id: f.tenant.clone(),
            effective_date: Utc::now(),
            created_by: "test".to_string(),
            lines: vec![
                JournalLine::debit(a.id.clone(), LedgerEntryType::Payment, kes(1_000), "d"),
                JournalLine::credit(b.id.clone(), LedgerEntryType::Payment, kes(1_000), "c"),
            ],
        })
        .await
        .unwrap();

    let report = f.engine.verify_ledger(&f.tenant).await.unwrap();
    assert_eq!(report.accounts_checked, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn drift_is_reported_per_account() {
    let f = fixture();
    let a = Account::new(f.tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    let b = Account::new(f.tenant.clone(), AccountType::OwnerOperating, Currency::KES);
    f.store.create(a.clone()).await.unwrap();
    f.store.create(b.clone()).await.unwrap();

    f.ledger
        .post_journal(PostJournalRequest {
            tenant_id: f.tenant.clone(),
            effective_date: Utc::now(),
            created_by: "test".to_string(),
            lines: vec![
                JournalLine::debit(b.id.clone(), LedgerEntryType::Payment, kes(9_000), "d"),
                JournalLine::credit(a.id.clone(), LedgerEntryType::Payment, kes(9_000), "c"),
            ],
        })
        .await
        .unwrap();

    // Corrupt the materialised balance of one account.
    f.store
        .overwrite_balance_unchecked(&f.tenant, &a.id, -8_000)
        .await;

    let report = f.engine.verify_ledger(&f.tenant).await.unwrap();
    assert_eq!(report.exceptions.len(), 1);
    let exception = &report.exceptions[0];
    assert_eq!(exception.code, "balance_drift");
    assert_eq!(exception.account_id.as_ref(), Some(&a.id));
    assert_eq!(exception.severity, ExceptionSeverity::Warning);

    // The exception is also published as an event.
    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "reconciliation_exception"));
}

#[tokio::test]
async fn stale_processing_intents_are_synced_from_the_provider() {
    let f = fixture();
    let intent = f
        .orchestrator
        .create_payment(CreatePaymentRequest {
            tenant_id: f.tenant.clone(),
            customer_id: CustomerId::new("cust-1"),
            lease_id: None,
            payment_type: PaymentType::Rent,
            amount: kes(45_000),
            description: "Rent".to_string(),
            statement_descriptor: "NYUMBAPAY RENT".to_string(),
            idempotency_key: "sync-1".to_string(),
            payment_method: None,
            metadata: HashMap::new(),
        })
        .await
        .unwrap();
    assert_eq!(intent.status, PaymentStatus::Processing);
    let external_id = intent.external_id.clone().unwrap();

    // The callback never arrived; the intent has been processing for an hour
    // and the provider meanwhile settled the checkout.
    let mut stale = intent.clone();
    stale.updated_at = Utc::now() - Duration::hours(1);
    f.intents.update(&stale).await.unwrap();
    f.mpesa.settle_checkout(&external_id, "QLX9AB34CD");

    let report = f.engine.sync_provider_status(&f.tenant).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.updated, 1);

    let synced = f
        .orchestrator
        .get_intent(&f.tenant, &intent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(synced.status, PaymentStatus::Succeeded);
    assert_eq!(synced.receipt_url.as_deref(), Some("QLX9AB34CD"));

    // A second pass finds nothing stale.
    let report = f.engine.sync_provider_status(&f.tenant).await.unwrap();
    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn bank_matching_produces_a_balanced_record() {
    let f = fixture();
    let settlement = Account::new(f.tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    let mirror = Account::new(f.tenant.clone(), AccountType::CustomerLiability, Currency::KES);
    f.store.create(settlement.clone()).await.unwrap();
    f.store.create(mirror.clone()).await.unwrap();

    let paid = settled_payment(&f, 45_000, "rec-1", "Rent Acme Unit 5A").await;
    let today = paid.paid_at.unwrap();

    // Mirror the settlement in the ledger so the expected closing agrees
    // with the bank feed.
    f.ledger
        .post_journal(PostJournalRequest {
            tenant_id: f.tenant.clone(),
            effective_date: today,
            created_by: "test".to_string(),
            lines: vec![
                JournalLine::debit(
                    settlement.id.clone(),
                    LedgerEntryType::Payment,
                    kes(45_000),
                    "bank settlement",
                ),
                JournalLine::credit(
                    mirror.id.clone(),
                    LedgerEntryType::Payment,
                    kes(45_000),
                    "bank settlement",
                ),
            ],
        })
        .await
        .unwrap();

    let period = Period::custom(today - Duration::days(2), today + Duration::days(2)).unwrap();
    let transactions = vec![
        BankTransaction {
            id: "bank-1".to_string(),
            date: today,
            amount: kes(45_000),
            direction: BankTransactionDirection::Credit,
            reference: "RENT Acme 5A".to_string(),
        },
        BankTransaction {
            id: "bank-2".to_string(),
            date: today,
            amount: kes(7_700),
            direction: BankTransactionDirection::Debit,
            reference: "bank charges".to_string(),
        },
    ];

    let record = f
        .engine
        .match_bank_transactions(
            &f.tenant,
            &settlement.id,
            period,
            kes(7_700),
            transactions,
        )
        .await
        .unwrap();

    assert_eq!(record.matched_items.len(), 1);
    assert_eq!(record.matched_items[0].outcome, MatchOutcome::Exact);
    assert!(record.unmatched_payments.is_empty());
    // The debit transaction has no payment counterpart.
    assert_eq!(record.unmatched_bank_transactions.len(), 1);
    assert_eq!(record.unmatched_bank_transactions[0].id, "bank-2");

    // closing = opening + credits − debits = 7700 + 45000 − 7700.
    assert_eq!(record.closing_balance, kes(45_000));
    assert_eq!(record.expected_balance, kes(45_000));
    assert_eq!(record.discrepancy_minor_units, 0);

    // The only exception is the unmatched bank debit.
    assert_eq!(record.exceptions.len(), 1);
    assert_eq!(record.exceptions[0].code, "unmatched_bank_transaction");
}

#[tokio::test]
async fn bank_discrepancy_raises_a_critical_exception() {
    let f = fixture();
    let settlement = Account::new(f.tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    f.store.create(settlement.clone()).await.unwrap();

    let paid = settled_payment(&f, 45_000, "rec-2", "Rent Acme Unit 5A").await;
    let today = paid.paid_at.unwrap();
    let period = Period::custom(today - Duration::days(2), today + Duration::days(2)).unwrap();

    // Bank saw the money; the ledger never recorded a settlement entry.
    let record = f
        .engine
        .match_bank_transactions(
            &f.tenant,
            &settlement.id,
            period,
            kes(0),
            vec![BankTransaction {
                id: "bank-1".to_string(),
                date: today,
                amount: kes(45_000),
                direction: BankTransactionDirection::Credit,
                reference: "RENT Acme 5A".to_string(),
            }],
        )
        .await
        .unwrap();

    assert_eq!(record.discrepancy_minor_units, 45_000);
    assert!(record
        .exceptions
        .iter()
        .any(|e| e.code == "bank_balance_discrepancy"
            && e.severity == ExceptionSeverity::Critical));
}
