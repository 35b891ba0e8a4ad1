//! Payment provider port and routing registry.
//!
//! Each adapter wraps one external provider (card/marketplace, mobile
//! money). Adapters declare their supported currencies; a provider that
//! lacks a capability surfaces `Unsupported` rather than guessing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nyumbapay_common::{CoreError, Currency, CustomerId, ErrorKind, Money, OwnerId, TenantId};

use crate::error::PaymentError;
use crate::webhook::ProviderWebhookEvent;

/// Errors reported by provider adapters.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider declined: {code}: {message}")]
    Declined { code: String, message: String },

    #[error("provider call timed out: {0}")]
    Timeout(String),

    #[error("webhook signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("provider does not support {0}")]
    Unsupported(&'static str),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::Unavailable(_)
        )
    }
}

impl CoreError for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unsupported(_) => ErrorKind::Unsupported,
            _ => ErrorKind::Provider,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ProviderError::Declined { .. } => "provider_declined",
            ProviderError::Timeout(_) => "provider_timeout",
            ProviderError::SignatureVerification(_) => "webhook_signature_invalid",
            ProviderError::Unsupported(_) => "unsupported_operation",
            ProviderError::Unavailable(_) => "provider_unavailable",
            ProviderError::InvalidRequest(_) => "provider_invalid_request",
        }
    }
}

/// Provider-side customer reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerHandle {
    pub provider_customer_id: String,
}

/// Request to open a payment intent at the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub amount: Money,
    pub customer_id: CustomerId,
    pub payment_method: Option<String>,
    pub description: String,
    /// At most 22 characters; validated upstream.
    pub statement_descriptor: String,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
    pub platform_fee: Option<Money>,
    /// Marketplace destination (connected account), where supported.
    pub destination: Option<String>,
}

/// Authoritative provider-side payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderPaymentStatus {
    Pending,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Cancelled,
}

/// Snapshot of a provider-side payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPaymentIntent {
    pub external_id: String,
    pub status: ProviderPaymentStatus,
    pub receipt_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// Provider-side refund outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub status: RefundStatus,
}

/// Request to push funds out to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Money,
    pub destination: String,
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderTransferStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTransfer {
    pub transfer_id: String,
    pub status: ProviderTransferStatus,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// A stored payment method at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub kind: String,
    pub display: String,
}

/// Marketplace connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub account_ref: String,
}

/// Onboarding link for a connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// The adapter interface the core consumes.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_currencies(&self) -> &[Currency];

    async fn create_customer(
        &self,
        tenant_id: &TenantId,
        customer_id: &CustomerId,
        email: &str,
    ) -> Result<CustomerHandle, ProviderError>;

    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntentRequest,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn confirm_payment_intent(
        &self,
        external_id: &str,
        payment_method: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn cancel_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn get_payment_intent_status(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError>;

    async fn refund_payment(
        &self,
        external_id: &str,
        amount: Money,
        reason: Option<&str>,
    ) -> Result<RefundOutcome, ProviderError>;

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ProviderTransfer, ProviderError>;

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<ProviderTransfer, ProviderError>;

    async fn list_payment_methods(
        &self,
        customer: &CustomerHandle,
    ) -> Result<Vec<PaymentMethod>, ProviderError>;

    async fn attach_payment_method(
        &self,
        customer: &CustomerHandle,
        method_id: &str,
    ) -> Result<(), ProviderError>;

    async fn detach_payment_method(
        &self,
        customer: &CustomerHandle,
        method_id: &str,
    ) -> Result<(), ProviderError>;

    async fn create_connected_account(
        &self,
        owner_id: &OwnerId,
        email: &str,
    ) -> Result<ConnectedAccount, ProviderError>;

    async fn create_account_link(
        &self,
        account: &ConnectedAccount,
        return_url: &str,
    ) -> Result<AccountLink, ProviderError>;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), ProviderError>;

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<ProviderWebhookEvent, ProviderError>;
}

/// Routes payments to providers by currency, with a default fallback.
/// Read-mostly; effectively immutable after startup wiring.
#[derive(Default)]
pub struct ProviderRegistry {
    by_currency: RwLock<HashMap<Currency, Arc<dyn PaymentProvider>>>,
    by_name: RwLock<HashMap<&'static str, Arc<dyn PaymentProvider>>>,
    default: RwLock<Option<Arc<dyn PaymentProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for every currency it supports.
    pub fn register(&self, provider: Arc<dyn PaymentProvider>) {
        self.by_name.write().insert(provider.name(), provider.clone());
        let mut map = self.by_currency.write();
        for currency in provider.supported_currencies() {
            map.insert(*currency, provider.clone());
        }
    }

    /// Set the fallback used for currencies with no dedicated mapping.
    pub fn set_default(&self, provider: Arc<dyn PaymentProvider>) {
        self.by_name.write().insert(provider.name(), provider.clone());
        *self.default.write() = Some(provider);
    }

    /// Resolve the provider responsible for a currency.
    pub fn resolve(&self, currency: Currency) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        let provider = self
            .by_currency
            .read()
            .get(&currency)
            .cloned()
            .or_else(|| self.default.read().clone())
            .ok_or(PaymentError::NoProviderForCurrency(currency))?;
        if !provider.supported_currencies().contains(&currency) {
            return Err(PaymentError::NoProviderForCurrency(currency));
        }
        Ok(provider)
    }

    /// Look up a provider by adapter name (webhook ingress path).
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownProvider(name.to_string()))
    }
}
