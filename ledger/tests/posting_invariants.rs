//! Property tests for the journal-posting invariants.

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use nyumbapay_common::{Currency, Money, TenantId};
use nyumbapay_events::NoopPublisher;
use nyumbapay_ledger::{
    Account, AccountRepository, AccountType, InMemoryLedgerStore, JournalLine, LedgerEngine,
    LedgerEntryType, PostJournalRequest,
};

/// A generated journal: per-line `(account_index, amount_minor)` debits,
/// offset by a single balancing credit.
fn balanced_journal() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0usize..3, 1i64..=500_000), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn posted_journals_keep_sequences_gapless_and_balances_exact(
        journals in prop::collection::vec(balanced_journal(), 1..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async move {
            let store = Arc::new(InMemoryLedgerStore::new());
            let engine = LedgerEngine::new(store.clone(), store.clone(), Arc::new(NoopPublisher));
            let tenant = TenantId::new("tn-prop");

            let mut debit_accounts = Vec::new();
            for _ in 0..3 {
                let account =
                    Account::new(tenant.clone(), AccountType::OwnerOperating, Currency::KES);
                store.create(account.clone()).await.unwrap();
                debit_accounts.push(account);
            }
            let offset =
                Account::new(tenant.clone(), AccountType::PlatformHolding, Currency::KES);
            store.create(offset.clone()).await.unwrap();

            for journal in &journals {
                let mut lines = Vec::new();
                let mut total = 0i64;
                for (idx, amount) in journal {
                    total += amount;
                    lines.push(JournalLine::debit(
                        debit_accounts[*idx].id.clone(),
                        LedgerEntryType::Payment,
                        Money::new(*amount, Currency::KES),
                        "generated",
                    ));
                }
                lines.push(JournalLine::credit(
                    offset.id.clone(),
                    LedgerEntryType::Payment,
                    Money::new(total, Currency::KES),
                    "offset",
                ));

                engine
                    .post_journal(PostJournalRequest {
                        tenant_id: tenant.clone(),
                        effective_date: Utc::now(),
                        created_by: "prop".to_string(),
                        lines,
                    })
                    .await
                    .unwrap();
            }

            // Sequences are gapless and the materialised balance equals the
            // recomputed balance on every account.
            for account in debit_accounts.iter().chain(std::iter::once(&offset)) {
                let seq = engine.verify_sequence(&account.id, &tenant).await.unwrap();
                assert!(seq.valid, "gaps {:?} duplicates {:?}", seq.gaps, seq.duplicates);

                let balance = engine.verify_account_balance(&account.id, &tenant).await.unwrap();
                assert!(balance.valid, "drift {}", balance.discrepancy_minor_units);
            }

            // Debits equal credits across the whole ledger.
            let mut net = 0i64;
            for account in debit_accounts.iter().chain(std::iter::once(&offset)) {
                net += engine.balance(&account.id, &tenant).await.unwrap().minor_units;
            }
            assert_eq!(net, 0);
        });
    }
}
