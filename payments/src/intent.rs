//! Payment intent aggregate and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nyumbapay_common::{CustomerId, LeaseId, Money, PaymentIntentId, TenantId};

use crate::error::PaymentError;

/// Maximum length of a card statement descriptor.
pub const MAX_STATEMENT_DESCRIPTOR: usize = 22;

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created, awaiting an explicit `process_payment`.
    Pending,
    /// Handed to the provider.
    Processing,
    /// Provider requires a user step (3DS, STK prompt).
    RequiresAction,
    /// Settled. Terminal except for refunds.
    Succeeded,
    Failed,
    Cancelled,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    /// Whether no further payment-status transitions are allowed.
    /// `Succeeded` still accepts refund operations.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    /// Whether refunds may be applied in this state.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded
        )
    }

    /// Valid next states from the current state.
    pub fn valid_transitions(&self) -> &[PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[PaymentStatus::Processing, PaymentStatus::Cancelled],
            PaymentStatus::Processing => &[
                PaymentStatus::RequiresAction,
                PaymentStatus::Succeeded,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::RequiresAction => &[
                PaymentStatus::Processing,
                PaymentStatus::Succeeded,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Succeeded => &[
                PaymentStatus::PartiallyRefunded,
                PaymentStatus::Refunded,
            ],
            PaymentStatus::PartiallyRefunded => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    /// Check if transition to the given state is valid.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Business meaning of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Rent,
    Deposit,
    Fee,
    Other,
}

/// A payment intent: one attempt to collect money from a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub lease_id: Option<LeaseId>,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount: Money,
    /// Recorded at creation time and immutable afterwards.
    pub platform_fee: Money,
    pub net_amount: Money,
    pub description: String,
    pub statement_descriptor: String,
    /// Unique per `(tenant, idempotency_key)`.
    pub idempotency_key: String,
    pub external_id: Option<String>,
    pub provider_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub receipt_url: Option<String>,
}

impl PaymentIntent {
    /// Move to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, next: PaymentStatus) -> Result<(), PaymentError> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        let now = Utc::now();
        self.updated_at = now;
        match next {
            PaymentStatus::Succeeded => self.paid_at = Some(now),
            PaymentStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Amount still refundable.
    pub fn refundable_amount(&self) -> Money {
        let refunded = self
            .refunded_amount
            .map(|m| m.minor_units)
            .unwrap_or(0);
        Money::new(self.amount.minor_units - refunded, self.amount.currency)
    }

    /// Record a provider-confirmed refund and move the status. Returns
    /// `true` when the intent is now fully refunded. The over-refund guard
    /// runs first so exhausted intents report `over_refund`, not an illegal
    /// transition.
    pub fn apply_refund(&mut self, amount: Money) -> Result<bool, PaymentError> {
        self.amount.ensure_same_currency(amount).map_err(|e| {
            PaymentError::CurrencyMismatch {
                expected: e.expected,
                actual: e.actual,
            }
        })?;
        if !amount.is_positive() {
            return Err(PaymentError::NonPositiveAmount);
        }
        let refundable = self.refundable_amount();
        if amount.minor_units > refundable.minor_units {
            return Err(PaymentError::OverRefund {
                requested: amount,
                refundable,
            });
        }
        if !self.status.is_refundable() {
            return Err(PaymentError::IllegalTransition {
                from: self.status,
                to: PaymentStatus::Refunded,
            });
        }

        let total = self
            .refunded_amount
            .map(|m| m.minor_units)
            .unwrap_or(0)
            + amount.minor_units;
        self.refunded_amount = Some(Money::new(total, self.amount.currency));
        let full = total == self.amount.minor_units;
        let next = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        if self.status != next {
            self.transition_to(next)?;
        } else {
            self.updated_at = Utc::now();
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyumbapay_common::Currency;

    fn intent(status: PaymentStatus) -> PaymentIntent {
        let now = Utc::now();
        PaymentIntent {
            id: PaymentIntentId::new(),
            tenant_id: TenantId::new("tn-1"),
            customer_id: CustomerId::new("cust-1"),
            lease_id: None,
            payment_type: PaymentType::Rent,
            status,
            amount: Money::new(100_000, Currency::KES),
            platform_fee: Money::new(5_000, Currency::KES),
            net_amount: Money::new(95_000, Currency::KES),
            description: "February rent".to_string(),
            statement_descriptor: "NYUMBAPAY RENT".to_string(),
            idempotency_key: "k1".to_string(),
            external_id: None,
            provider_name: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            cancelled_at: None,
            refunded_amount: None,
            failure_reason: None,
            receipt_url: None,
        }
    }

    #[test]
    fn happy_path_transitions() {
        let mut p = intent(PaymentStatus::Pending);
        p.transition_to(PaymentStatus::Processing).unwrap();
        p.transition_to(PaymentStatus::RequiresAction).unwrap();
        p.transition_to(PaymentStatus::Processing).unwrap();
        p.transition_to(PaymentStatus::Succeeded).unwrap();
        assert!(p.paid_at.is_some());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut p = intent(PaymentStatus::Failed);
        let err = p.transition_to(PaymentStatus::Processing).unwrap_err();
        assert!(matches!(err, PaymentError::IllegalTransition { .. }));

        let mut p = intent(PaymentStatus::Pending);
        // Pending cannot jump straight to Succeeded.
        assert!(p.transition_to(PaymentStatus::Succeeded).is_err());
    }

    #[test]
    fn cancellation_from_open_states() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::RequiresAction,
        ] {
            let mut p = intent(status);
            p.transition_to(PaymentStatus::Cancelled).unwrap();
            assert!(p.cancelled_at.is_some());
        }
    }

    #[test]
    fn refund_accumulates_to_full() {
        let mut p = intent(PaymentStatus::Succeeded);

        let full = p.apply_refund(Money::new(30_000, Currency::KES)).unwrap();
        assert!(!full);
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(p.refunded_amount.unwrap().minor_units, 30_000);

        let full = p.apply_refund(Money::new(70_000, Currency::KES)).unwrap();
        assert!(full);
        assert_eq!(p.status, PaymentStatus::Refunded);

        // Nothing refundable remains, so even one more minor unit is an
        // over-refund.
        let err = p.apply_refund(Money::new(1, Currency::KES)).unwrap_err();
        assert!(matches!(err, PaymentError::OverRefund { .. }));
    }

    #[test]
    fn over_refund_is_rejected() {
        let mut p = intent(PaymentStatus::Succeeded);
        p.apply_refund(Money::new(90_000, Currency::KES)).unwrap();
        let err = p.apply_refund(Money::new(10_001, Currency::KES)).unwrap_err();
        assert!(matches!(err, PaymentError::OverRefund { .. }));
        assert_eq!(p.refunded_amount.unwrap().minor_units, 90_000);
    }

    #[test]
    fn refund_rejects_other_currencies_and_non_positive() {
        let mut p = intent(PaymentStatus::Succeeded);
        assert!(matches!(
            p.apply_refund(Money::new(100, Currency::USD)),
            Err(PaymentError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            p.apply_refund(Money::zero(Currency::KES)),
            Err(PaymentError::NonPositiveAmount)
        ));
    }
}
