//! Statement builder tests over the in-memory ledger.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use nyumbapay_common::{Currency, Money, OwnerId, Period, TenantId};
use nyumbapay_events::MemoryPublisher;
use nyumbapay_ledger::{
    Account, AccountRepository, AccountType, InMemoryLedgerStore, JournalLine, LedgerEngine,
    LedgerEntryType, PostJournalRequest,
};
use nyumbapay_statements::{
    export, ExportFormat, GenerateStatementRequest, InMemoryStatementRepository, StatementBuilder,
    StatementError, StatementStatus, StatementType,
};

struct Fixture {
    tenant: TenantId,
    store: Arc<InMemoryLedgerStore>,
    ledger: Arc<LedgerEngine>,
    builder: StatementBuilder,
    publisher: Arc<MemoryPublisher>,
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
    let builder = StatementBuilder::new(
        Arc::new(InMemoryStatementRepository::new()),
        ledger.clone(),
        store.clone(),
        publisher.clone(),
    );
    Fixture {
        tenant,
        store,
        ledger,
        builder,
        publisher,
    }
}

fn kes(minor: i64) -> Money {
    Money::new(minor, Currency::KES)
}

async fn post(
    f: &Fixture,
    debit: &Account,
    credit: &Account,
    entry_type: LedgerEntryType,
    minor: i64,
    when: chrono::DateTime<Utc>,
    description: &str,
) {
    f.ledger
        .post_journal(PostJournalRequest {
            tenant_id: f.tenant.clone(),
            effective_date: when,
            created_by: "test".to_string(),
            lines: vec![
                JournalLine::debit(debit.id.clone(), entry_type, kes(minor), description),
                JournalLine::credit(credit.id.clone(), entry_type, kes(minor), description),
            ],
        })
        .await
        .unwrap();
}

fn request(f: &Fixture, account: &Account, period: Period) -> GenerateStatementRequest {
    GenerateStatementRequest {
        tenant_id: f.tenant.clone(),
        account_id: account.id.clone(),
        statement_type: StatementType::Owner,
        owner_id: Some(OwnerId::new("own-1")),
        customer_id: None,
        property_id: None,
        period,
    }
}

/// The documented February scenario: opening 10_000, then within the month
/// debit 45_000, credit 5_000, debit 45_000, credit 90_000.
async fn february_fixture() -> (Fixture, Account) {
    let f = fixture();
    let account = Account::new(f.tenant.clone(), AccountType::OwnerOperating, Currency::KES);
    let offset = Account::new(f.tenant.clone(), AccountType::PlatformHolding, Currency::KES);
    f.store.create(account.clone()).await.unwrap();
    f.store.create(offset.clone()).await.unwrap();

    let january = Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0).unwrap();
    post(&f, &account, &offset, LedgerEntryType::Payment, 10_000, january, "opening rent").await;

    let feb = |day: u32| Utc.with_ymd_and_hms(2026, 2, day, 12, 0, 0).unwrap();
    post(&f, &account, &offset, LedgerEntryType::Payment, 45_000, feb(3), "rent unit 5a").await;
    post(&f, &offset, &account, LedgerEntryType::Disbursement, 5_000, feb(10), "payout").await;
    post(&f, &account, &offset, LedgerEntryType::Payment, 45_000, feb(17), "rent unit 5b").await;
    post(&f, &offset, &account, LedgerEntryType::Disbursement, 90_000, feb(25), "payout").await;

    (f, account)
}

#[tokio::test]
async fn february_statement_matches_the_documented_figures() {
    let (f, account) = february_fixture().await;
    let period = Period::monthly(2026, 2).unwrap();

    let statement = f.builder.generate(request(&f, &account, period)).await.unwrap();

    assert_eq!(statement.status, StatementStatus::Generated);
    assert_eq!(statement.opening_balance, kes(10_000));
    assert_eq!(statement.total_debits, kes(90_000));
    assert_eq!(statement.total_credits, kes(95_000));
    assert_eq!(statement.closing_balance, kes(5_000));
    assert_eq!(statement.line_items.len(), 4);

    // closing = opening + debits − credits.
    assert_eq!(
        statement.closing_balance.minor_units,
        statement.opening_balance.minor_units + statement.total_debits.minor_units
            - statement.total_credits.minor_units
    );

    // Running balance on the last line equals the closing balance.
    assert_eq!(
        statement.line_items.last().unwrap().balance,
        statement.closing_balance
    );

    // One debit-type and one credit-type category, sorted by |net| desc.
    assert_eq!(statement.category_summaries.len(), 2);
    let disbursements = &statement.category_summaries[0];
    assert_eq!(disbursements.entry_type, LedgerEntryType::Disbursement);
    assert_eq!(disbursements.net, kes(-95_000));
    let payments = &statement.category_summaries[1];
    assert_eq!(payments.entry_type, LedgerEntryType::Payment);
    assert_eq!(payments.net, kes(90_000));

    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "statement_generated"));
}

#[tokio::test]
async fn duplicate_period_is_rejected() {
    let (f, account) = february_fixture().await;
    let period = Period::monthly(2026, 2).unwrap();

    f.builder.generate(request(&f, &account, period)).await.unwrap();
    let err = f
        .builder
        .generate(request(&f, &account, period))
        .await
        .unwrap_err();
    assert!(matches!(err, StatementError::DuplicateStatement));

    // A different period for the same account is fine.
    let march = Period::monthly(2026, 3).unwrap();
    f.builder.generate(request(&f, &account, march)).await.unwrap();
}

#[tokio::test]
async fn statement_with_no_prior_entries_opens_at_zero() {
    let f = fixture();
    let account = Account::new(f.tenant.clone(), AccountType::CustomerLiability, Currency::KES);
    f.store.create(account.clone()).await.unwrap();

    let statement = f
        .builder
        .generate(request(&f, &account, Period::monthly(2026, 2).unwrap()))
        .await
        .unwrap();
    assert!(statement.opening_balance.is_zero());
    assert!(statement.closing_balance.is_zero());
    assert!(statement.line_items.is_empty());
    assert!(statement.category_summaries.is_empty());
}

#[tokio::test]
async fn delivery_lifecycle() {
    let (f, account) = february_fixture().await;
    let statement = f
        .builder
        .generate(request(&f, &account, Period::monthly(2026, 2).unwrap()))
        .await
        .unwrap();

    // Viewing before sending is illegal.
    let err = f.builder.mark_viewed(&f.tenant, &statement.id).await.unwrap_err();
    assert!(matches!(err, StatementError::IllegalTransition { .. }));

    let sent = f
        .builder
        .deliver(&f.tenant, &statement.id, "owner@acme.example")
        .await
        .unwrap();
    assert_eq!(sent.status, StatementStatus::Sent);
    assert!(sent.sent_at.is_some());
    assert_eq!(sent.delivery_destination.as_deref(), Some("owner@acme.example"));
    assert!(f
        .publisher
        .events()
        .iter()
        .any(|e| e.event_type() == "statement_sent"));

    let viewed = f.builder.mark_viewed(&f.tenant, &statement.id).await.unwrap();
    assert_eq!(viewed.status, StatementStatus::Viewed);
    assert!(viewed.viewed_at.is_some());
}

#[tokio::test]
async fn export_formats() {
    let (f, account) = february_fixture().await;
    let statement = f
        .builder
        .generate(request(&f, &account, Period::monthly(2026, 2).unwrap()))
        .await
        .unwrap();

    let json = export(&statement, ExportFormat::Json).unwrap();
    assert_eq!(json.content_type, "application/json");
    let decoded: serde_json::Value = serde_json::from_slice(&json.content).unwrap();
    assert_eq!(decoded["opening_balance"]["minor_units"], 10_000);

    let csv = export(&statement, ExportFormat::Csv).unwrap();
    assert_eq!(csv.content_type, "text/csv");
    let text = String::from_utf8(csv.content).unwrap();
    assert!(text.starts_with("Statement,"));
    assert!(text.contains("Opening Balance,100.00\n"));
    assert!(text.contains("Date,Type,Description,Reference,Debit,Credit,Balance"));
    assert!(text.contains("Category,Total Debits,Total Credits,Net"));
    // Metadata, items and summaries are separated by blank rows.
    assert_eq!(text.matches("\n\n").count(), 2);

    let html = export(&statement, ExportFormat::PdfHtml).unwrap();
    assert_eq!(html.content_type, "text/html; charset=utf-8");
    let page = String::from_utf8(html.content).unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));
    assert!(page.contains("Account Statement"));
    assert!(page.contains("rent unit 5a"));
    assert!(html.filename.ends_with(".html"));
}
