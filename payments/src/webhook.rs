//! Webhook payload translation and ingress.
//!
//! Provider callbacks arrive in provider-specific shapes; adapters parse
//! them into the uniform `ProviderWebhookEvent` the orchestrator dispatches.
//! Signatures are verified per the adapter's rules before dispatch, and the
//! ingress always acks once the event has been handled so providers stop
//! redelivering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::PaymentError;
use crate::orchestrator::PaymentOrchestrator;
use crate::provider::{PaymentProvider, ProviderError, ProviderPaymentStatus, ProviderRegistry};

/// Uniform webhook event dispatched into the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWebhookEvent {
    pub provider: String,
    pub external_id: String,
    pub status: ProviderPaymentStatus,
    pub receipt_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// Card/marketplace provider webhook body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardWebhookPayload {
    pub event_type: String,
    pub external_id: String,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

/// Map a card provider event to the uniform webhook event.
pub fn translate_card_event(
    provider: &str,
    payload: &CardWebhookPayload,
) -> Result<ProviderWebhookEvent, ProviderError> {
    let (status, receipt_url, failure_reason) = match payload.event_type.as_str() {
        "payment_succeeded" => (
            ProviderPaymentStatus::Succeeded,
            payload.receipt_url.clone(),
            None,
        ),
        "payment_failed" => (
            ProviderPaymentStatus::Failed,
            None,
            payload.failure_reason.clone(),
        ),
        "payment_cancelled" => (
            ProviderPaymentStatus::Cancelled,
            None,
            payload.cancellation_reason.clone(),
        ),
        other => {
            return Err(ProviderError::InvalidRequest(format!(
                "unknown card event type: {other}"
            )))
        }
    };
    Ok(ProviderWebhookEvent {
        provider: provider.to_string(),
        external_id: payload.external_id.clone(),
        status,
        receipt_url,
        failure_reason,
    })
}

/// Result code a mobile-money push callback reports for a cancelled prompt.
const MOBILE_MONEY_USER_CANCELLED: i64 = 1032;

/// Mobile-money push callback body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileMoneyCallback {
    pub external_id: String,
    pub result_code: i64,
    pub result_description: String,
    #[serde(default)]
    pub receipt_number: Option<String>,
}

/// Map a mobile-money push callback to the uniform webhook event.
pub fn translate_mobile_money_callback(
    provider: &str,
    callback: &MobileMoneyCallback,
) -> ProviderWebhookEvent {
    let (status, receipt_url, failure_reason) = match callback.result_code {
        0 => (
            ProviderPaymentStatus::Succeeded,
            callback.receipt_number.clone(),
            None,
        ),
        MOBILE_MONEY_USER_CANCELLED => (ProviderPaymentStatus::Cancelled, None, None),
        _ => (
            ProviderPaymentStatus::Failed,
            None,
            Some(callback.result_description.clone()),
        ),
    };
    ProviderWebhookEvent {
        provider: provider.to_string(),
        external_id: callback.external_id.clone(),
        status,
        receipt_url,
        failure_reason,
    }
}

/// Webhook front door: verifies, parses and dispatches a raw callback.
pub struct WebhookIngress {
    orchestrator: Arc<PaymentOrchestrator>,
    registry: Arc<ProviderRegistry>,
}

impl WebhookIngress {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Verify the signature, parse and dispatch. Returns `Ok` once the
    /// event has been durably handled, which the caller turns into a
    /// provider-success acknowledgement.
    #[instrument(skip(self, payload, signature))]
    pub async fn ingest(
        &self,
        provider_name: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), PaymentError> {
        let provider = self.registry.get_by_name(provider_name)?;
        provider.verify_webhook_signature(payload, signature)?;
        let event = provider.parse_webhook_event(payload)?;
        info!(
            provider = provider_name,
            external_id = %event.external_id,
            status = ?event.status,
            "Webhook accepted"
        );
        self.orchestrator.handle_webhook(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_events_map_to_uniform_statuses() {
        let succeeded = CardWebhookPayload {
            event_type: "payment_succeeded".to_string(),
            external_id: "cb_pi_1".to_string(),
            receipt_url: Some("https://pay.example/r/1".to_string()),
            failure_reason: None,
            cancellation_reason: None,
        };
        let event = translate_card_event("cardbridge", &succeeded).unwrap();
        assert_eq!(event.status, ProviderPaymentStatus::Succeeded);
        assert_eq!(event.receipt_url.as_deref(), Some("https://pay.example/r/1"));

        let failed = CardWebhookPayload {
            event_type: "payment_failed".to_string(),
            external_id: "cb_pi_2".to_string(),
            receipt_url: None,
            failure_reason: Some("insufficient funds".to_string()),
            cancellation_reason: None,
        };
        let event = translate_card_event("cardbridge", &failed).unwrap();
        assert_eq!(event.status, ProviderPaymentStatus::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("insufficient funds"));

        let cancelled = CardWebhookPayload {
            event_type: "payment_cancelled".to_string(),
            external_id: "cb_pi_3".to_string(),
            receipt_url: None,
            failure_reason: None,
            cancellation_reason: Some("requested".to_string()),
        };
        let event = translate_card_event("cardbridge", &cancelled).unwrap();
        assert_eq!(event.status, ProviderPaymentStatus::Cancelled);

        let unknown = CardWebhookPayload {
            event_type: "dispute_opened".to_string(),
            external_id: "cb_pi_4".to_string(),
            receipt_url: None,
            failure_reason: None,
            cancellation_reason: None,
        };
        assert!(translate_card_event("cardbridge", &unknown).is_err());
    }

    #[test]
    fn mobile_money_result_codes() {
        let base = MobileMoneyCallback {
            external_id: "mp_chk_1".to_string(),
            result_code: 0,
            result_description: "Success".to_string(),
            receipt_number: Some("QGR7TY12XZ".to_string()),
        };
        let event = translate_mobile_money_callback("mpesa", &base);
        assert_eq!(event.status, ProviderPaymentStatus::Succeeded);
        assert_eq!(event.receipt_url.as_deref(), Some("QGR7TY12XZ"));

        let cancelled = MobileMoneyCallback {
            result_code: 1032,
            ..base.clone()
        };
        let event = translate_mobile_money_callback("mpesa", &cancelled);
        assert_eq!(event.status, ProviderPaymentStatus::Cancelled);

        let failed = MobileMoneyCallback {
            result_code: 2001,
            result_description: "Wrong PIN".to_string(),
            ..base
        };
        let event = translate_mobile_money_callback("mpesa", &failed);
        assert_eq!(event.status, ProviderPaymentStatus::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("Wrong PIN"));
    }
}
