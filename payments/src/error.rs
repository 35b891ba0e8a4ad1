//! Payment orchestrator error types.

use thiserror::Error;

use nyumbapay_common::{CoreError, Currency, ErrorKind, Money, PaymentIntentId, TenantId};
use nyumbapay_events::PublishError;

use crate::intent::PaymentStatus;
use crate::provider::ProviderError;

/// Errors surfaced by the payment orchestrator.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no provider registered for currency {0}")]
    NoProviderForCurrency(Currency),

    #[error("no provider registered under name {0}")]
    UnknownProvider(String),

    #[error("statement descriptor exceeds 22 characters ({length})")]
    DescriptorTooLong { length: usize },

    #[error("payment amount must be positive")]
    NonPositiveAmount,

    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        expected: Currency,
        actual: Currency,
    },

    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("payment intent not found: {0}")]
    IntentNotFound(PaymentIntentId),

    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("refund of {requested} exceeds refundable {refundable}")]
    OverRefund {
        requested: Money,
        refundable: Money,
    },

    #[error("intent has no provider reference yet")]
    MissingExternalReference,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError for PaymentError {
    fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::NoProviderForCurrency(_)
            | PaymentError::DescriptorTooLong { .. }
            | PaymentError::NonPositiveAmount
            | PaymentError::CurrencyMismatch { .. } => ErrorKind::Validation,
            PaymentError::UnknownProvider(_)
            | PaymentError::TenantNotFound(_)
            | PaymentError::IntentNotFound(_) => ErrorKind::NotFound,
            PaymentError::IllegalTransition { .. }
            | PaymentError::OverRefund { .. }
            | PaymentError::MissingExternalReference => ErrorKind::State,
            PaymentError::Provider(e) => e.kind(),
            PaymentError::Publish(_) | PaymentError::Storage(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            PaymentError::NoProviderForCurrency(_) => "no_provider_for_currency",
            PaymentError::UnknownProvider(_) => "unknown_provider",
            PaymentError::DescriptorTooLong { .. } => "statement_descriptor_too_long",
            PaymentError::NonPositiveAmount => "non_positive_amount",
            PaymentError::CurrencyMismatch { .. } => "currency_mismatch",
            PaymentError::TenantNotFound(_) => "tenant_not_found",
            PaymentError::IntentNotFound(_) => "payment_intent_not_found",
            PaymentError::IllegalTransition { .. } => "illegal_transition",
            PaymentError::OverRefund { .. } => "over_refund",
            PaymentError::MissingExternalReference => "missing_external_reference",
            PaymentError::Provider(e) => e.code(),
            PaymentError::Publish(_) => "event_publish_failed",
            PaymentError::Storage(_) => "storage_error",
        }
    }
}
