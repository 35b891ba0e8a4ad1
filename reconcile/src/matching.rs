//! Fuzzy matching of internal payments against bank transactions.
//!
//! Scoring is additive per candidate; the amount, date and reference-id
//! signals are tiered, with only the highest applicable tier counting.
//! Assignment is one-to-one: a consumed bank transaction leaves the pool.
//! Matching is deterministic given identically ordered inputs: payments
//! iterate in `(paid_at, id)` order and candidates in `(date, id)` order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use nyumbapay_common::{calendar_day_distance, same_calendar_day, PaymentIntentId};
use nyumbapay_payments::PaymentIntent;

use crate::bank::BankTransaction;

/// Matching thresholds and tolerances.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Minimum score for an automatic match.
    pub match_threshold: i32,
    /// Scores in `[ambiguous, match)` are consumed but flagged for review.
    pub ambiguous_threshold: i32,
    /// Amount difference in minor units still considered equal.
    pub amount_tolerance_minor: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 60,
            ambiguous_threshold: 40,
            amount_tolerance_minor: 0,
        }
    }
}

/// Outcome of matching one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchOutcome {
    /// Confident match with the amount agreeing within tolerance.
    Exact,
    /// Confident match with an amount difference.
    Partial,
    /// Consumed one-to-one but flagged for manual review.
    Ambiguous,
    Unmatched,
}

/// Per-payment match record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMatch {
    pub payment_intent_id: PaymentIntentId,
    pub outcome: MatchOutcome,
    pub bank_transaction_id: Option<String>,
    pub score: i32,
}

/// Result of one matching run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<PaymentMatch>,
    pub unmatched_bank_transactions: Vec<BankTransaction>,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_string())
        .collect()
}

/// Score one candidate against a payment, or `None` when the candidate is
/// disqualified outright (currency mismatch).
pub fn score_candidate(
    payment: &PaymentIntent,
    transaction: &BankTransaction,
    config: &MatchConfig,
) -> Option<i32> {
    if transaction.amount.currency != payment.amount.currency {
        return None;
    }

    let mut score = 0;
    let reference = transaction.reference.to_lowercase();

    // Identifier signals: the strongest applicable one counts.
    if reference.contains(&payment.id.to_string().to_lowercase()) {
        score += 40;
    } else if payment
        .external_id
        .as_deref()
        .map(|external| reference.contains(&external.to_lowercase()))
        .unwrap_or(false)
    {
        score += 35;
    } else if reference.contains(&payment.idempotency_key.to_lowercase()) {
        score += 30;
    }

    // Description prefix: first 10 characters, if that leaves something
    // substantial to look for.
    let prefix: String = payment
        .description
        .to_lowercase()
        .chars()
        .take(10)
        .collect();
    let prefix = prefix.trim();
    if prefix.len() >= 5 && reference.contains(prefix) {
        score += 10;
    }

    // Amount tiers.
    let diff = (transaction.amount.minor_units - payment.amount.minor_units).abs();
    let amount = payment.amount.minor_units.abs();
    if diff == 0 {
        score += 30;
    } else if diff <= config.amount_tolerance_minor {
        score += 20;
    } else if diff * 100 <= amount {
        score += 10;
    } else if diff * 20 <= amount {
        score += 5;
    }

    // Date tiers.
    let paid_at = payment.paid_at.unwrap_or(payment.created_at);
    if same_calendar_day(transaction.date, paid_at) {
        score += 20;
    } else {
        match calendar_day_distance(transaction.date, paid_at) {
            1 => score += 10,
            2 => score += 5,
            _ => {}
        }
    }

    // Description word overlap, capped.
    let overlap = tokens(&payment.description)
        .intersection(&tokens(&transaction.reference))
        .count() as i32;
    score += (overlap * 5).min(10);

    Some(score)
}

struct Candidate {
    index: usize,
    score: i32,
    day_distance: i64,
    exact_amount: bool,
}

/// Match payments one-to-one against a pool of bank transactions.
pub fn match_transactions(
    payments: &[PaymentIntent],
    transactions: &[BankTransaction],
    config: &MatchConfig,
) -> MatchResult {
    let mut payments: Vec<&PaymentIntent> = payments.iter().collect();
    payments.sort_by(|a, b| {
        a.paid_at
            .cmp(&b.paid_at)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });

    let mut pool: Vec<BankTransaction> = transactions.to_vec();
    pool.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let mut matches = Vec::with_capacity(payments.len());
    for payment in payments {
        let mut best: Option<Candidate> = None;
        for (index, transaction) in pool.iter().enumerate() {
            let Some(score) = score_candidate(payment, transaction, config) else {
                continue;
            };
            let paid_at = payment.paid_at.unwrap_or(payment.created_at);
            let candidate = Candidate {
                index,
                score,
                day_distance: calendar_day_distance(transaction.date, paid_at),
                exact_amount: transaction.amount.minor_units == payment.amount.minor_units,
            };
            // Tie-break at equal score: smaller date distance, then exact
            // amount equality, then FIFO by bank-transaction date (the pool
            // iterates in that order, so the incumbent wins ties).
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.score > current.score
                        || (candidate.score == current.score
                            && (candidate.day_distance < current.day_distance
                                || (candidate.day_distance == current.day_distance
                                    && candidate.exact_amount
                                    && !current.exact_amount)))
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        let record = match best {
            Some(candidate) if candidate.score >= config.match_threshold => {
                let transaction = pool.remove(candidate.index);
                let diff =
                    (transaction.amount.minor_units - payment.amount.minor_units).abs();
                let outcome = if diff <= config.amount_tolerance_minor {
                    MatchOutcome::Exact
                } else {
                    MatchOutcome::Partial
                };
                PaymentMatch {
                    payment_intent_id: payment.id.clone(),
                    outcome,
                    bank_transaction_id: Some(transaction.id),
                    score: candidate.score,
                }
            }
            Some(candidate) if candidate.score >= config.ambiguous_threshold => {
                let transaction = pool.remove(candidate.index);
                PaymentMatch {
                    payment_intent_id: payment.id.clone(),
                    outcome: MatchOutcome::Ambiguous,
                    bank_transaction_id: Some(transaction.id),
                    score: candidate.score,
                }
            }
            other => PaymentMatch {
                payment_intent_id: payment.id.clone(),
                outcome: MatchOutcome::Unmatched,
                bank_transaction_id: None,
                score: other.map(|c| c.score).unwrap_or(0),
            },
        };
        matches.push(record);
    }

    MatchResult {
        matches,
        unmatched_bank_transactions: pool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use nyumbapay_common::{Currency, CustomerId, Money, TenantId};
    use nyumbapay_payments::{PaymentStatus, PaymentType};

    fn paid_intent(
        amount_minor: i64,
        paid_at: chrono::DateTime<Utc>,
        description: &str,
        external_id: &str,
    ) -> PaymentIntent {
        PaymentIntent {
            id: PaymentIntentId::new(),
            tenant_id: TenantId::new("tn-1"),
            customer_id: CustomerId::new("cust-1"),
            lease_id: None,
            payment_type: PaymentType::Rent,
            status: PaymentStatus::Succeeded,
            amount: Money::new(amount_minor, Currency::KES),
            platform_fee: Money::new(0, Currency::KES),
            net_amount: Money::new(amount_minor, Currency::KES),
            description: description.to_string(),
            statement_descriptor: "NYUMBAPAY".to_string(),
            idempotency_key: "idem-xyz".to_string(),
            external_id: Some(external_id.to_string()),
            provider_name: Some("mpesa".to_string()),
            created_at: paid_at,
            updated_at: paid_at,
            paid_at: Some(paid_at),
            cancelled_at: None,
            refunded_amount: None,
            failure_reason: None,
            receipt_url: None,
        }
    }

    fn txn(id: &str, date: chrono::DateTime<Utc>, amount_minor: i64, reference: &str) -> BankTransaction {
        BankTransaction {
            id: id.to_string(),
            date,
            amount: Money::new(amount_minor, Currency::KES),
            direction: crate::bank::BankTransactionDirection::Credit,
            reference: reference.to_string(),
        }
    }

    fn feb(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn scores_the_documented_rent_scenario() {
        let payment = paid_intent(45_000, feb(13), "Rent Acme Unit 5A", "mpesa_XYZ");
        let config = MatchConfig::default();

        // Same day, exact amount, overlapping words and the description
        // prefix: 30 + 20 + 10 + 10.
        let a = txn("bank-a", feb(13), 45_000, "RENT Acme 5A");
        assert_eq!(score_candidate(&payment, &a, &config), Some(70));

        // External-id reference, 1% amount, one day off: 35 + 10 + 10.
        let b = txn("bank-b", feb(14), 44_900, "mpesa_XYZ transfer");
        assert_eq!(score_candidate(&payment, &b, &config), Some(55));

        let result = match_transactions(
            std::slice::from_ref(&payment),
            &[b.clone(), a.clone()],
            &config,
        );
        assert_eq!(result.matches.len(), 1);
        let m = &result.matches[0];
        assert_eq!(m.outcome, MatchOutcome::Exact);
        assert_eq!(m.bank_transaction_id.as_deref(), Some("bank-a"));
        assert_eq!(m.score, 70);
        assert_eq!(result.unmatched_bank_transactions, vec![b]);
    }

    #[test]
    fn lower_scoring_candidate_alone_is_ambiguous() {
        let payment = paid_intent(45_000, feb(13), "Rent Acme Unit 5A", "mpesa_XYZ");
        let config = MatchConfig::default();
        let b = txn("bank-b", feb(14), 44_900, "mpesa_XYZ transfer");

        let result = match_transactions(std::slice::from_ref(&payment), &[b], &config);
        let m = &result.matches[0];
        assert_eq!(m.outcome, MatchOutcome::Ambiguous);
        // Consumed despite the flag: one-to-one assignment.
        assert_eq!(m.bank_transaction_id.as_deref(), Some("bank-b"));
        assert!(result.unmatched_bank_transactions.is_empty());
    }

    #[test]
    fn currency_mismatch_disqualifies() {
        let payment = paid_intent(45_000, feb(13), "Rent Acme Unit 5A", "mpesa_XYZ");
        let mut usd = txn("bank-u", feb(13), 45_000, "RENT Acme 5A");
        usd.amount = Money::new(45_000, Currency::USD);
        assert_eq!(score_candidate(&payment, &usd, &MatchConfig::default()), None);
    }

    #[test]
    fn amount_and_date_tiers_are_exclusive() {
        let payment = paid_intent(100_000, feb(10), "payment", "ext_1");
        let config = MatchConfig::default();

        // 2% off, 2 days away, nothing else: 5 + 5.
        let t = txn("bank-t", feb(12), 98_000, "no overlap here");
        assert_eq!(score_candidate(&payment, &t, &config), Some(10));

        // Beyond 5% and beyond 2 days scores nothing at all.
        let far = txn("bank-f", feb(20), 80_000, "zzz qqq");
        assert_eq!(score_candidate(&payment, &far, &config), Some(0));
    }

    #[test]
    fn tie_break_prefers_smaller_date_distance_then_exact_amount() {
        let payment = paid_intent(50_000, feb(10), "water bill block c", "ext_2");
        let config = MatchConfig {
            match_threshold: 30,
            ..MatchConfig::default()
        };

        // Both score 30 (exact amount): one same-day would score 50, so use
        // two transactions at equal distance, one with exact amount.
        let same_distance_exact = txn("bank-2", feb(12), 50_000, "...");
        let same_distance_close = txn("bank-1", feb(12), 50_100, "water bill block c ref");

        let close_score = score_candidate(&payment, &same_distance_close, &config).unwrap();
        let exact_score = score_candidate(&payment, &same_distance_exact, &config).unwrap();
        assert_eq!(close_score, exact_score);

        let result = match_transactions(
            std::slice::from_ref(&payment),
            &[same_distance_close, same_distance_exact],
            &config,
        );
        assert_eq!(
            result.matches[0].bank_transaction_id.as_deref(),
            Some("bank-2")
        );
    }

    #[test]
    fn matching_is_deterministic() {
        let payments: Vec<PaymentIntent> = (0..4)
            .map(|i| paid_intent(10_000 + i * 1_000, feb(5 + i as u32), "monthly rent", "ext"))
            .collect();
        let transactions: Vec<BankTransaction> = (0..4)
            .map(|i| {
                txn(
                    &format!("bank-{i}"),
                    feb(5 + i as u32),
                    10_000 + i * 1_000,
                    "monthly rent settlement",
                )
            })
            .collect();

        let config = MatchConfig::default();
        let first = match_transactions(&payments, &transactions, &config);
        let second = match_transactions(&payments, &transactions, &config);
        assert_eq!(first, second);
    }
}
