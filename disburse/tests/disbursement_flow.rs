//! Disbursement service and scheduler tests over the in-memory stores.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use nyumbapay_common::{
    Currency, Money, OwnerId, PayoutSchedule, PayoutSettings, Period, StaticTenantDirectory,
    TenantId, TenantView,
};
use nyumbapay_disburse::{
    DestinationType, DisburseConfig, DisburseError, DisbursementRequest, DisbursementScheduler,
    DisbursementService, DisbursementStatus, InMemoryDisbursementRepository, SchedulerConfig,
    StaticPayoutDestinations, TransferResult,
};
use nyumbapay_events::MemoryPublisher;
use nyumbapay_ledger::{
    Account, AccountRepository, AccountScope, AccountType, InMemoryLedgerStore, JournalLine,
    LedgerEngine, LedgerEntryType, PostJournalRequest,
};
use nyumbapay_payments::{MpesaSandbox, ProviderRegistry};

struct Fixture {
    tenant: TenantId,
    store: Arc<InMemoryLedgerStore>,
    ledger: Arc<LedgerEngine>,
    service: Arc<DisbursementService>,
    destinations: Arc<StaticPayoutDestinations>,
    tenants: Arc<StaticTenantDirectory>,
    mpesa: Arc<MpesaSandbox>,
    publisher: Arc<MemoryPublisher>,
    holding: Account,
}

fn kes(minor: i64) -> Money {
    Money::new(minor, Currency::KES)
}

async fn fixture() -> Fixture {
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
        payout: PayoutSettings {
            minimum_disbursement: kes(10_000),
            holdback_percent: dec!(0),
            schedule: PayoutSchedule::Daily,
        },
    });

    let holding = Account::new(tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    store.create(holding.clone()).await.unwrap();

    let destinations = Arc::new(StaticPayoutDestinations::new());
    let service = Arc::new(DisbursementService::new(
        Arc::new(InMemoryDisbursementRepository::new()),
        store.clone(),
        ledger.clone(),
        registry,
        tenants.clone(),
        publisher.clone(),
        DisburseConfig::default(),
    ));

    Fixture {
        tenant,
        store,
        ledger,
        service,
        destinations,
        tenants,
        mpesa,
        publisher,
        holding,
    }
}

/// Open an operating account for the owner and accrue `minor` of rent income
/// on it (debit owner, credit holding), mirroring the payment projection.
async fn owner_with_income(f: &Fixture, owner: &str, minor: i64) -> (OwnerId, Account) {
    let owner_id = OwnerId::new(owner);
    let account = Account::new(f.tenant.clone(), AccountType::OwnerOperating, Currency::KES)
        .with_scope(AccountScope::Owner(owner_id.clone()));
    f.store.create(account.clone()).await.unwrap();

    if minor > 0 {
        f.ledger
            .post_journal(PostJournalRequest {
                tenant_id: f.tenant.clone(),
                effective_date: Utc::now(),
                created_by: "test".to_string(),
                lines: vec![
                    JournalLine::debit(
                        account.id.clone(),
                        LedgerEntryType::Payment,
                        kes(minor),
                        "rent income",
                    ),
                    JournalLine::credit(
                        f.holding.id.clone(),
                        LedgerEntryType::Payment,
                        kes(minor),
                        "rent income",
                    ),
                ],
            })
            .await
            .unwrap();
    }
    (owner_id, account)
}

fn request(f: &Fixture, owner_id: &OwnerId, amount: Option<Money>, key: &str) -> DisbursementRequest {
    DisbursementRequest {
        tenant_id: f.tenant.clone(),
        owner_id: owner_id.clone(),
        amount,
        destination: "254700000001".to_string(),
        destination_type: DestinationType::MobileMoney,
        idempotency_key: key.to_string(),
    }
}

#[tokio::test]
async fn full_balance_disbursement_posts_the_journal() {
    let f = fixture().await;
    let (owner_id, account) = owner_with_income(&f, "own-1", 250_000).await;

    let result = f
        .service
        .process(request(&f, &owner_id, None, "dsb-1"))
        .await
        .unwrap();
    assert!(!result.replayed);
    let record = &result.disbursement;
    assert_eq!(record.status, DisbursementStatus::InTransit);
    assert_eq!(record.amount, kes(250_000));
    assert!(record.transfer_id.is_some());
    assert!(record.ledger_entry_id.is_some());
    assert!(record.estimated_arrival.is_some());

    // platform_holding DR / owner_operating CR brings both back to zero.
    assert!(f
        .ledger
        .balance(&account.id, &f.tenant)
        .await
        .unwrap()
        .is_zero());
    assert!(f
        .ledger
        .balance(&f.holding.id, &f.tenant)
        .await
        .unwrap()
        .is_zero());

    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "disbursement_initiated"));
}

#[tokio::test]
async fn idempotency_key_replays_the_existing_record() {
    let f = fixture().await;
    let (owner_id, _) = owner_with_income(&f, "own-1", 100_000).await;

    let first = f
        .service
        .process(request(&f, &owner_id, Some(kes(40_000)), "dsb-2"))
        .await
        .unwrap();
    let second = f
        .service
        .process(request(&f, &owner_id, Some(kes(40_000)), "dsb-2"))
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.disbursement.id, first.disbursement.id);
}

#[tokio::test]
async fn amount_guards() {
    let f = fixture().await;
    let (owner_id, _) = owner_with_income(&f, "own-1", 100_000).await;

    let err = f
        .service
        .process(request(&f, &owner_id, Some(kes(100_001)), "dsb-3"))
        .await
        .unwrap_err();
    assert!(matches!(err, DisburseError::InsufficientBalance { .. }));

    let err = f
        .service
        .process(request(&f, &owner_id, Some(kes(0)), "dsb-4"))
        .await
        .unwrap_err();
    assert!(matches!(err, DisburseError::NonPositiveAmount));

    // An owner with nothing accrued has nothing to disburse.
    let (broke_owner, _) = owner_with_income(&f, "own-2", 0).await;
    let err = f
        .service
        .process(request(&f, &broke_owner, None, "dsb-5"))
        .await
        .unwrap_err();
    assert!(matches!(err, DisburseError::NonPositiveAmount));
}

#[tokio::test]
async fn provider_failure_leaves_no_journal() {
    let f = fixture().await;
    let (owner_id, account) = owner_with_income(&f, "own-1", 80_000).await;
    f.mpesa.set_fail_transfers(true);

    let result = f
        .service
        .process(request(&f, &owner_id, None, "dsb-6"))
        .await
        .unwrap();
    assert_eq!(result.disbursement.status, DisbursementStatus::Failed);
    assert!(result.disbursement.failure_reason.is_some());
    assert!(result.disbursement.ledger_entry_id.is_none());

    // The owner's entitlement is untouched.
    assert_eq!(
        f.ledger.balance(&account.id, &f.tenant).await.unwrap(),
        kes(80_000)
    );
    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "disbursement_failed"));
}

#[tokio::test]
async fn transfer_result_callbacks() {
    let f = fixture().await;
    let (owner_id, _) = owner_with_income(&f, "own-1", 60_000).await;

    let result = f
        .service
        .process(request(&f, &owner_id, None, "dsb-7"))
        .await
        .unwrap();
    let transfer_id = result.disbursement.transfer_id.clone().unwrap();

    // Timeout first: unknown outcome, flag for reconciliation.
    f.service
        .handle_transfer_result(&transfer_id, TransferResult::Timeout)
        .await
        .unwrap();
    let flagged = f
        .service
        .preview(&f.tenant, &owner_id, None)
        .await
        .unwrap();
    // Preview still works; the record itself carries the flag.
    assert!(flagged.available.is_zero());

    // Then the definitive result arrives.
    f.service
        .handle_transfer_result(&transfer_id, TransferResult::Paid)
        .await
        .unwrap();
    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "disbursement_settled"));

    // Replaying the result is a no-op.
    f.service
        .handle_transfer_result(&transfer_id, TransferResult::Paid)
        .await
        .unwrap();

    // Unknown transfer ids are acknowledged.
    f.service
        .handle_transfer_result("mp_b2c_999999", TransferResult::Paid)
        .await
        .unwrap();
}

#[tokio::test]
async fn preview_and_eligibility() {
    let f = fixture().await;
    let (rich, _) = owner_with_income(&f, "own-rich", 200_000).await;
    let (poor, _) = owner_with_income(&f, "own-poor", 5_000).await;

    let preview = f.service.preview(&f.tenant, &rich, None).await.unwrap();
    assert_eq!(preview.available, kes(200_000));
    assert_eq!(preview.payout, kes(200_000));
    assert!(preview.eligible);

    // Below the tenant's 10_000 minimum.
    let preview = f.service.preview(&f.tenant, &poor, None).await.unwrap();
    assert!(!preview.eligible);

    let owners = f
        .service
        .eligible_owners(&f.tenant, kes(10_000))
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].owner_id, rich);
    assert_eq!(owners[0].balance, kes(200_000));
}

#[tokio::test]
async fn holdback_reduces_the_preview_payout() {
    let f = fixture().await;
    f.tenants.upsert(TenantView {
        tenant_id: f.tenant.clone(),
        platform_fee_percent: dec!(5),
        payout: PayoutSettings {
            minimum_disbursement: kes(0),
            holdback_percent: dec!(10),
            schedule: PayoutSchedule::Daily,
        },
    });
    let (owner_id, _) = owner_with_income(&f, "own-1", 100_000).await;

    let preview = f.service.preview(&f.tenant, &owner_id, None).await.unwrap();
    assert_eq!(preview.holdback, kes(10_000));
    assert_eq!(preview.payout, kes(90_000));
}

#[tokio::test]
async fn breakdown_sums_entries_by_type() {
    let f = fixture().await;
    let (owner_id, account) = owner_with_income(&f, "own-1", 150_000).await;

    // Deduct fees and maintenance against a platform revenue account.
    let revenue = Account::new(f.tenant.clone(), AccountType::PlatformRevenue, Currency::KES);
    f.store.create(revenue.clone()).await.unwrap();
    for (entry_type, minor) in [
        (LedgerEntryType::PlatformFee, 7_500),
        (LedgerEntryType::ProcessingFee, 1_500),
        (LedgerEntryType::Maintenance, 20_000),
        (LedgerEntryType::Deduction, 4_000),
    ] {
        f.ledger
            .post_journal(PostJournalRequest {
                tenant_id: f.tenant.clone(),
                effective_date: Utc::now(),
                created_by: "test".to_string(),
                lines: vec![
                    JournalLine::debit(revenue.id.clone(), entry_type, kes(minor), "charge"),
                    JournalLine::credit(account.id.clone(), entry_type, kes(minor), "charge"),
                ],
            })
            .await
            .unwrap();
    }

    let period = Period::custom(Utc::now() - Duration::days(1), Utc::now() + Duration::days(1))
        .unwrap();
    let breakdown = f
        .service
        .breakdown(&f.tenant, &owner_id, period)
        .await
        .unwrap();
    assert_eq!(breakdown.gross, kes(150_000));
    assert_eq!(breakdown.platform_fee, kes(7_500));
    assert_eq!(breakdown.processing_fee, kes(1_500));
    assert_eq!(breakdown.maintenance, kes(20_000));
    assert_eq!(breakdown.other_deductions, kes(4_000));
    assert_eq!(breakdown.holdback, kes(0));
    // net = 150000 − 7500 − 1500 − 20000 − 4000.
    assert_eq!(breakdown.net, kes(117_000));
}

#[tokio::test]
async fn scheduler_processes_owners_and_isolates_failures() {
    let f = fixture().await;
    let (a, _) = owner_with_income(&f, "own-a", 50_000).await;
    let (b, _) = owner_with_income(&f, "own-b", 60_000).await;
    let (_c, _) = owner_with_income(&f, "own-c", 70_000).await;

    f.destinations.upsert(
        f.tenant.clone(),
        a.clone(),
        "254700000001".to_string(),
        DestinationType::MobileMoney,
    );
    f.destinations.upsert(
        f.tenant.clone(),
        b.clone(),
        "254700000002".to_string(),
        DestinationType::MobileMoney,
    );
    // own-c has no destination on file.

    let scheduler = DisbursementScheduler::new(
        f.service.clone(),
        f.destinations.clone(),
        f.tenants.clone(),
        SchedulerConfig {
            delay_between: std::time::Duration::from_millis(1),
            ..SchedulerConfig::default()
        },
    );

    let report = scheduler.run_due(&f.tenant).await.unwrap().unwrap();
    assert_eq!(report.eligible, 3);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.skipped_no_destination, 1);
    assert_eq!(report.failed, 0);

    // Same day: the schedule already ran.
    assert!(scheduler.run_due(&f.tenant).await.unwrap().is_none());
}

#[tokio::test]
async fn scheduler_batch_cap_defers_the_rest() {
    let f = fixture().await;
    for (i, owner) in ["own-a", "own-b", "own-c"].iter().enumerate() {
        let (owner_id, _) = owner_with_income(&f, owner, 50_000 + i as i64).await;
        f.destinations.upsert(
            f.tenant.clone(),
            owner_id,
            format!("25470000000{i}"),
            DestinationType::MobileMoney,
        );
    }

    let scheduler = DisbursementScheduler::new(
        f.service.clone(),
        f.destinations.clone(),
        f.tenants.clone(),
        SchedulerConfig {
            batch_size: 1,
            delay_between: std::time::Duration::from_millis(1),
            ..SchedulerConfig::default()
        },
    );

    let report = scheduler.run_once(&f.tenant).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.deferred, 2);
}
