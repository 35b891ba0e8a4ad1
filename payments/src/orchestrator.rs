//! Payment orchestrator: intent lifecycle across providers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, instrument, warn};

use nyumbapay_common::{CustomerId, LeaseId, Money, PaymentIntentId, TenantId, TenantDirectory};
use nyumbapay_events::{DomainEvent, EventPublisher};

use crate::error::PaymentError;
use crate::intent::{PaymentIntent, PaymentStatus, PaymentType, MAX_STATEMENT_DESCRIPTOR};
use crate::provider::{
    CreatePaymentIntentRequest, PaymentProvider, ProviderError, ProviderPaymentStatus,
    ProviderRegistry, RefundStatus,
};
use crate::repository::PaymentIntentRepository;
use crate::webhook::ProviderWebhookEvent;

/// Platform fee in minor units: `round(amount × fee_percent / 100)`,
/// half away from zero. Computed once at creation and immutable afterwards.
pub fn compute_platform_fee(amount: Money, fee_percent: Decimal) -> Money {
    let fee = (Decimal::from(amount.minor_units) * fee_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Money::new(fee.to_i64().unwrap_or(0), amount.currency)
}

/// Request to create a payment intent.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub lease_id: Option<LeaseId>,
    pub payment_type: PaymentType,
    pub amount: Money,
    pub description: String,
    pub statement_descriptor: String,
    pub idempotency_key: String,
    /// When present the intent is confirmed immediately.
    pub payment_method: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Outcome of a refund operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundResult {
    pub payment_intent: PaymentIntent,
    pub refund_id: String,
    pub refunded_amount: Money,
    pub full: bool,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline applied to every provider call.
    pub provider_timeout: std::time::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Drives payment intents through their lifecycle.
pub struct PaymentOrchestrator {
    intents: Arc<dyn PaymentIntentRepository>,
    providers: Arc<ProviderRegistry>,
    tenants: Arc<dyn TenantDirectory>,
    publisher: Arc<dyn EventPublisher>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        intents: Arc<dyn PaymentIntentRepository>,
        providers: Arc<ProviderRegistry>,
        tenants: Arc<dyn TenantDirectory>,
        publisher: Arc<dyn EventPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            intents,
            providers,
            tenants,
            publisher,
            config,
        }
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{operation} exceeded {:?}",
                self.config.provider_timeout
            ))),
        }
    }

    /// Create a payment intent. Idempotent per `(tenant, idempotency_key)`:
    /// a replay returns the stored intent with its current status.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, idempotency_key = %request.idempotency_key))]
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        if !request.amount.is_positive() {
            return Err(PaymentError::NonPositiveAmount);
        }
        if request.statement_descriptor.chars().count() > MAX_STATEMENT_DESCRIPTOR {
            return Err(PaymentError::DescriptorTooLong {
                length: request.statement_descriptor.chars().count(),
            });
        }

        if let Some(existing) = self
            .intents
            .find_by_idempotency_key(&request.tenant_id, &request.idempotency_key)
            .await?
        {
            info!(intent_id = %existing.id, "Idempotent replay, returning stored intent");
            return Ok(existing);
        }

        let tenant = self
            .tenants
            .get(&request.tenant_id)
            .await
            .ok_or_else(|| PaymentError::TenantNotFound(request.tenant_id.clone()))?;
        let platform_fee = compute_platform_fee(request.amount, tenant.platform_fee_percent);
        let net_amount = Money::new(
            request.amount.minor_units - platform_fee.minor_units,
            request.amount.currency,
        );

        let now = Utc::now();
        let mut intent = PaymentIntent {
            id: PaymentIntentId::new(),
            tenant_id: request.tenant_id.clone(),
            customer_id: request.customer_id.clone(),
            lease_id: request.lease_id.clone(),
            payment_type: request.payment_type,
            status: PaymentStatus::Pending,
            amount: request.amount,
            platform_fee,
            net_amount,
            description: request.description.clone(),
            statement_descriptor: request.statement_descriptor.clone(),
            idempotency_key: request.idempotency_key.clone(),
            external_id: None,
            provider_name: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            cancelled_at: None,
            refunded_amount: None,
            failure_reason: None,
            receipt_url: None,
        };

        // Persisted before any provider call so a crash cannot lose the
        // idempotency record.
        self.intents.insert(intent.clone()).await?;
        self.publisher
            .publish(DomainEvent::PaymentCreated {
                tenant_id: intent.tenant_id.clone(),
                payment_intent_id: intent.id.clone(),
                customer_id: intent.customer_id.clone(),
                amount: intent.amount,
            })
            .await?;

        let provider = self.providers.resolve(intent.amount.currency)?;
        let mut metadata = request.metadata;
        metadata.insert("payment_intent_id".to_string(), intent.id.to_string());
        metadata.insert("idempotency_key".to_string(), intent.idempotency_key.clone());

        let provider_request = CreatePaymentIntentRequest {
            amount: intent.amount,
            customer_id: intent.customer_id.clone(),
            payment_method: request.payment_method.clone(),
            description: intent.description.clone(),
            statement_descriptor: intent.statement_descriptor.clone(),
            metadata,
            idempotency_key: intent.idempotency_key.clone(),
            platform_fee: Some(intent.platform_fee),
            destination: None,
        };

        if request.payment_method.is_some() {
            // Confirming immediately: we are initiating processing.
            intent.transition_to(PaymentStatus::Processing)?;
            self.intents.update(&intent).await?;
        }

        match self
            .with_deadline(
                "create_payment_intent",
                provider.create_payment_intent(&provider_request),
            )
            .await
        {
            Ok(created) => {
                intent.external_id = Some(created.external_id.clone());
                intent.provider_name = Some(provider.name().to_string());
                self.intents.update(&intent).await?;
                self.apply_provider_status(
                    &mut intent,
                    created.status,
                    created.receipt_url,
                    created.failure_reason,
                )
                .await?;
                self.intents.update(&intent).await?;
                Ok(intent)
            }
            Err(e) => {
                intent.failure_reason = Some(e.to_string());
                if intent.status == PaymentStatus::Processing {
                    intent.transition_to(PaymentStatus::Failed)?;
                    self.publisher
                        .publish(DomainEvent::PaymentFailed {
                            tenant_id: intent.tenant_id.clone(),
                            payment_intent_id: intent.id.clone(),
                            reason: e.to_string(),
                        })
                        .await?;
                }
                self.intents.update(&intent).await?;
                Err(e.into())
            }
        }
    }

    /// Confirm a pending intent with a payment method.
    #[instrument(skip(self))]
    pub async fn process_payment(
        &self,
        tenant_id: &TenantId,
        intent_id: &PaymentIntentId,
        payment_method: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut intent = self
            .intents
            .get(tenant_id, intent_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(intent_id.clone()))?;
        if intent.status != PaymentStatus::Pending {
            return Err(PaymentError::IllegalTransition {
                from: intent.status,
                to: PaymentStatus::Processing,
            });
        }
        let external_id = intent
            .external_id
            .clone()
            .ok_or(PaymentError::MissingExternalReference)?;
        let provider = self.providers.resolve(intent.amount.currency)?;

        intent.transition_to(PaymentStatus::Processing)?;
        self.intents.update(&intent).await?;

        match self
            .with_deadline(
                "confirm_payment_intent",
                provider.confirm_payment_intent(&external_id, payment_method),
            )
            .await
        {
            Ok(confirmed) => {
                self.apply_provider_status(
                    &mut intent,
                    confirmed.status,
                    confirmed.receipt_url,
                    confirmed.failure_reason,
                )
                .await?;
                self.intents.update(&intent).await?;
                Ok(intent)
            }
            Err(e) => {
                intent.failure_reason = Some(e.to_string());
                intent.transition_to(PaymentStatus::Failed)?;
                self.publisher
                    .publish(DomainEvent::PaymentFailed {
                        tenant_id: intent.tenant_id.clone(),
                        payment_intent_id: intent.id.clone(),
                        reason: e.to_string(),
                    })
                    .await?;
                self.intents.update(&intent).await?;
                Err(e.into())
            }
        }
    }

    /// Cancel an open intent.
    #[instrument(skip(self))]
    pub async fn cancel_payment(
        &self,
        tenant_id: &TenantId,
        intent_id: &PaymentIntentId,
        reason: Option<&str>,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut intent = self
            .intents
            .get(tenant_id, intent_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(intent_id.clone()))?;
        if !intent.status.can_transition_to(PaymentStatus::Cancelled) {
            return Err(PaymentError::IllegalTransition {
                from: intent.status,
                to: PaymentStatus::Cancelled,
            });
        }

        if let Some(external_id) = intent.external_id.clone() {
            let provider = self.providers.resolve(intent.amount.currency)?;
            self.with_deadline(
                "cancel_payment_intent",
                provider.cancel_payment_intent(&external_id),
            )
            .await?;
        }

        self.apply_provider_status(
            &mut intent,
            ProviderPaymentStatus::Cancelled,
            None,
            reason.map(str::to_string),
        )
        .await?;
        self.intents.update(&intent).await?;
        Ok(intent)
    }

    /// Refund part or all of a succeeded payment. Omitting `amount` refunds
    /// the remaining refundable balance.
    #[instrument(skip(self))]
    pub async fn refund(
        &self,
        tenant_id: &TenantId,
        intent_id: &PaymentIntentId,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> Result<RefundResult, PaymentError> {
        let mut intent = self
            .intents
            .get(tenant_id, intent_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(intent_id.clone()))?;

        let refundable = intent.refundable_amount();
        let requested = amount.unwrap_or(refundable);
        intent.amount.ensure_same_currency(requested).map_err(|e| {
            PaymentError::CurrencyMismatch {
                expected: e.expected,
                actual: e.actual,
            }
        })?;
        if !requested.is_positive() {
            return Err(PaymentError::NonPositiveAmount);
        }
        if requested.minor_units > refundable.minor_units {
            return Err(PaymentError::OverRefund {
                requested,
                refundable,
            });
        }
        if !intent.status.is_refundable() {
            return Err(PaymentError::IllegalTransition {
                from: intent.status,
                to: PaymentStatus::Refunded,
            });
        }

        let external_id = intent
            .external_id
            .clone()
            .ok_or(PaymentError::MissingExternalReference)?;
        let provider = self.providers.resolve(intent.amount.currency)?;
        let outcome = self
            .with_deadline(
                "refund_payment",
                provider.refund_payment(&external_id, requested, reason),
            )
            .await?;
        if outcome.status == RefundStatus::Failed {
            return Err(ProviderError::Declined {
                code: "refund_failed".to_string(),
                message: "provider rejected the refund".to_string(),
            }
            .into());
        }

        let full = intent.apply_refund(requested)?;
        self.intents.update(&intent).await?;
        self.publisher
            .publish(DomainEvent::PaymentRefunded {
                tenant_id: intent.tenant_id.clone(),
                payment_intent_id: intent.id.clone(),
                customer_id: intent.customer_id.clone(),
                amount: requested,
                refunded_total: intent.refunded_amount.unwrap_or(requested),
                original_amount: intent.amount,
                original_platform_fee: intent.platform_fee,
                full,
            })
            .await?;

        Ok(RefundResult {
            refund_id: outcome.refund_id,
            refunded_amount: requested,
            full,
            payment_intent: intent,
        })
    }

    /// Dispatch a provider webhook. Unknown external ids are logged and
    /// acked; replaying a terminal transition is a no-op; anything else
    /// illegal is logged and acked so providers stop redelivering.
    #[instrument(skip(self, event), fields(provider = %event.provider, external_id = %event.external_id))]
    pub async fn handle_webhook(&self, event: ProviderWebhookEvent) -> Result<(), PaymentError> {
        let Some(mut intent) = self
            .intents
            .find_by_external_id(&event.provider, &event.external_id)
            .await?
        else {
            info!("Webhook for unknown payment intent, acknowledging");
            return Ok(());
        };

        match self
            .apply_provider_status(&mut intent, event.status, event.receipt_url, event.failure_reason)
            .await
        {
            Ok(true) => self.intents.update(&intent).await,
            Ok(false) => Ok(()),
            Err(PaymentError::IllegalTransition { from, to }) => {
                warn!(?from, ?to, "Webhook transition not applicable, acknowledging");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch an intent.
    pub async fn get_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        self.intents.get(tenant_id, intent_id).await
    }

    /// Apply an authoritative provider status to the aggregate, publishing
    /// lifecycle events. Returns whether anything changed; applying the
    /// current status again is a no-op.
    pub(crate) async fn apply_provider_status(
        &self,
        intent: &mut PaymentIntent,
        status: ProviderPaymentStatus,
        receipt_url: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<bool, PaymentError> {
        let target = match status {
            // The provider has not started processing; nothing to apply.
            ProviderPaymentStatus::Pending => return Ok(false),
            ProviderPaymentStatus::Processing => PaymentStatus::Processing,
            ProviderPaymentStatus::RequiresAction => PaymentStatus::RequiresAction,
            ProviderPaymentStatus::Succeeded => PaymentStatus::Succeeded,
            ProviderPaymentStatus::Failed => PaymentStatus::Failed,
            ProviderPaymentStatus::Cancelled => PaymentStatus::Cancelled,
        };
        if intent.status == target {
            return Ok(false);
        }

        // A synchronous provider answer can arrive while the intent is
        // still pending; route through Processing to honour the diagram.
        if intent.status == PaymentStatus::Pending
            && matches!(
                target,
                PaymentStatus::RequiresAction | PaymentStatus::Succeeded | PaymentStatus::Failed
            )
        {
            intent.transition_to(PaymentStatus::Processing)?;
        }

        intent.transition_to(target)?;
        match target {
            PaymentStatus::Succeeded => {
                if receipt_url.is_some() {
                    intent.receipt_url = receipt_url;
                }
                self.publisher
                    .publish(DomainEvent::PaymentSucceeded {
                        tenant_id: intent.tenant_id.clone(),
                        payment_intent_id: intent.id.clone(),
                        customer_id: intent.customer_id.clone(),
                        lease_id: intent.lease_id.clone(),
                        amount: intent.amount,
                        platform_fee: intent.platform_fee,
                        net_amount: intent.net_amount,
                        paid_at: intent.paid_at.unwrap_or_else(Utc::now),
                        receipt_url: intent.receipt_url.clone(),
                    })
                    .await?;
            }
            PaymentStatus::Failed => {
                let reason = failure_reason.unwrap_or_else(|| "provider reported failure".into());
                intent.failure_reason = Some(reason.clone());
                self.publisher
                    .publish(DomainEvent::PaymentFailed {
                        tenant_id: intent.tenant_id.clone(),
                        payment_intent_id: intent.id.clone(),
                        reason,
                    })
                    .await?;
            }
            PaymentStatus::Cancelled => {
                self.publisher
                    .publish(DomainEvent::PaymentCancelled {
                        tenant_id: intent.tenant_id.clone(),
                        payment_intent_id: intent.id.clone(),
                        reason: failure_reason,
                    })
                    .await?;
            }
            _ => {}
        }
        Ok(true)
    }
}
