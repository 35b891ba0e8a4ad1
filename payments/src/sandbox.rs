//! Deterministic sandbox providers.
//!
//! `CardSandbox` models a card/marketplace provider (connected accounts,
//! instant transfers); `MpesaSandbox` models a mobile-money provider whose
//! payments settle through push callbacks. Both are fully in-memory and
//! deterministic so the orchestrator, disbursement and reconciliation tests
//! can script provider behaviour. Payment-method values starting with
//! reserved prefixes steer the card sandbox: `pm_3ds` requires action,
//! `pm_async` stays processing, `pm_declined` is declined.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use nyumbapay_common::{Currency, CustomerId, Money, OwnerId, TenantId};

use crate::provider::{
    AccountLink, ConnectedAccount, CreatePaymentIntentRequest, CustomerHandle, PaymentMethod,
    PaymentProvider, ProviderError, ProviderPaymentIntent, ProviderPaymentStatus,
    ProviderTransfer, ProviderTransferStatus, RefundOutcome, RefundStatus, TransferRequest,
};
use crate::webhook::{
    translate_card_event, translate_mobile_money_callback, CardWebhookPayload,
    MobileMoneyCallback, ProviderWebhookEvent,
};

fn sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

const CARD_CURRENCIES: [Currency; 3] = [Currency::USD, Currency::EUR, Currency::GBP];
const MOBILE_CURRENCIES: [Currency; 3] = [Currency::KES, Currency::TZS, Currency::UGX];

/// Card/marketplace sandbox provider.
pub struct CardSandbox {
    webhook_secret: String,
    counter: AtomicU64,
    intents: DashMap<String, ProviderPaymentIntent>,
    transfers: DashMap<String, ProviderTransfer>,
    fail_transfers: AtomicBool,
    fail_refunds: AtomicBool,
}

impl CardSandbox {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            counter: AtomicU64::new(0),
            intents: DashMap::new(),
            transfers: DashMap::new(),
            fail_transfers: AtomicBool::new(false),
            fail_refunds: AtomicBool::new(false),
        }
    }

    fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}_{n:06}")
    }

    /// Compute the signature this sandbox expects for a payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        sha256_hex(&self.webhook_secret, payload)
    }

    /// Script the next transfers to fail.
    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Script the next refunds to fail.
    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    fn status_for_method(method: Option<&str>) -> Result<ProviderPaymentStatus, ProviderError> {
        match method {
            None => Ok(ProviderPaymentStatus::Pending),
            Some("pm_3ds") => Ok(ProviderPaymentStatus::RequiresAction),
            Some("pm_async") => Ok(ProviderPaymentStatus::Processing),
            Some("pm_declined") => Err(ProviderError::Declined {
                code: "card_declined".to_string(),
                message: "the card was declined".to_string(),
            }),
            Some(_) => Ok(ProviderPaymentStatus::Succeeded),
        }
    }
}

#[async_trait]
impl PaymentProvider for CardSandbox {
    fn name(&self) -> &'static str {
        "cardbridge"
    }

    fn supported_currencies(&self) -> &[Currency] {
        &CARD_CURRENCIES
    }

    async fn create_customer(
        &self,
        _tenant_id: &TenantId,
        _customer_id: &CustomerId,
        _email: &str,
    ) -> Result<CustomerHandle, ProviderError> {
        Ok(CustomerHandle {
            provider_customer_id: self.next("cb_cus"),
        })
    }

    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntentRequest,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let status = Self::status_for_method(request.payment_method.as_deref())?;
        let external_id = self.next("cb_pi");
        let receipt_url = (status == ProviderPaymentStatus::Succeeded)
            .then(|| format!("https://pay.cardbridge.test/r/{external_id}"));
        let intent = ProviderPaymentIntent {
            external_id: external_id.clone(),
            status,
            receipt_url,
            failure_reason: None,
        };
        self.intents.insert(external_id, intent.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(
        &self,
        external_id: &str,
        payment_method: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let mut entry = self.intents.get_mut(external_id).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("unknown payment intent {external_id}"))
        })?;
        entry.status = Self::status_for_method(Some(payment_method))?;
        if entry.status == ProviderPaymentStatus::Succeeded {
            entry.receipt_url = Some(format!("https://pay.cardbridge.test/r/{external_id}"));
        }
        Ok(entry.clone())
    }

    async fn cancel_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let mut entry = self.intents.get_mut(external_id).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("unknown payment intent {external_id}"))
        })?;
        entry.status = ProviderPaymentStatus::Cancelled;
        Ok(entry.clone())
    }

    async fn get_payment_intent_status(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        self.intents
            .get(external_id)
            .map(|e| e.clone())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("unknown payment intent {external_id}"))
            })
    }

    async fn refund_payment(
        &self,
        external_id: &str,
        _amount: Money,
        _reason: Option<&str>,
    ) -> Result<RefundOutcome, ProviderError> {
        if !self.intents.contains_key(external_id) {
            return Err(ProviderError::InvalidRequest(format!(
                "unknown payment intent {external_id}"
            )));
        }
        let status = if self.fail_refunds.load(Ordering::SeqCst) {
            RefundStatus::Failed
        } else {
            RefundStatus::Succeeded
        };
        Ok(RefundOutcome {
            refund_id: self.next("cb_re"),
            status,
        })
    }

    async fn create_transfer(
        &self,
        _request: &TransferRequest,
    ) -> Result<ProviderTransfer, ProviderError> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(
                "transfers are paused".to_string(),
            ));
        }
        let transfer = ProviderTransfer {
            transfer_id: self.next("cb_tr"),
            status: ProviderTransferStatus::Paid,
            estimated_arrival: None,
            failure_reason: None,
        };
        self.transfers
            .insert(transfer.transfer_id.clone(), transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<ProviderTransfer, ProviderError> {
        self.transfers
            .get(transfer_id)
            .map(|t| t.clone())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("unknown transfer {transfer_id}"))
            })
    }

    async fn list_payment_methods(
        &self,
        _customer: &CustomerHandle,
    ) -> Result<Vec<PaymentMethod>, ProviderError> {
        Ok(vec![PaymentMethod {
            id: "pm_card_visa".to_string(),
            kind: "card".to_string(),
            display: "Visa •••• 4242".to_string(),
        }])
    }

    async fn attach_payment_method(
        &self,
        _customer: &CustomerHandle,
        _method_id: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn detach_payment_method(
        &self,
        _customer: &CustomerHandle,
        _method_id: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_connected_account(
        &self,
        _owner_id: &OwnerId,
        _email: &str,
    ) -> Result<ConnectedAccount, ProviderError> {
        Ok(ConnectedAccount {
            account_ref: self.next("cb_acct"),
        })
    }

    async fn create_account_link(
        &self,
        account: &ConnectedAccount,
        _return_url: &str,
    ) -> Result<AccountLink, ProviderError> {
        Ok(AccountLink {
            url: format!(
                "https://connect.cardbridge.test/onboard/{}",
                account.account_ref
            ),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), ProviderError> {
        if sha256_hex(&self.webhook_secret, payload) == signature {
            Ok(())
        } else {
            Err(ProviderError::SignatureVerification(
                "card webhook digest mismatch".to_string(),
            ))
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<ProviderWebhookEvent, ProviderError> {
        let parsed: CardWebhookPayload = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidRequest(format!("bad card webhook body: {e}")))?;
        translate_card_event(self.name(), &parsed)
    }
}

/// Mobile-money sandbox provider. Payments settle asynchronously through
/// push callbacks; marketplace features are not offered.
pub struct MpesaSandbox {
    webhook_secret: String,
    counter: AtomicU64,
    intents: DashMap<String, ProviderPaymentIntent>,
    transfers: DashMap<String, ProviderTransfer>,
    fail_transfers: AtomicBool,
}

impl MpesaSandbox {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            counter: AtomicU64::new(0),
            intents: DashMap::new(),
            transfers: DashMap::new(),
            fail_transfers: AtomicBool::new(false),
        }
    }

    fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}_{n:06}")
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        sha256_hex(&self.webhook_secret, payload)
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Settle a checkout on the provider side, as the processor would after
    /// the customer approves the push prompt.
    pub fn settle_checkout(&self, external_id: &str, receipt: &str) {
        if let Some(mut intent) = self.intents.get_mut(external_id) {
            intent.status = ProviderPaymentStatus::Succeeded;
            intent.receipt_url = Some(receipt.to_string());
        }
    }

    /// Settle an in-transit disbursement, as the result callback would.
    pub fn complete_transfer(&self, transfer_id: &str) {
        if let Some(mut transfer) = self.transfers.get_mut(transfer_id) {
            transfer.status = ProviderTransferStatus::Paid;
        }
    }

    /// Fail an in-transit disbursement.
    pub fn fail_transfer(&self, transfer_id: &str, reason: &str) {
        if let Some(mut transfer) = self.transfers.get_mut(transfer_id) {
            transfer.status = ProviderTransferStatus::Failed;
            transfer.failure_reason = Some(reason.to_string());
        }
    }
}

#[async_trait]
impl PaymentProvider for MpesaSandbox {
    fn name(&self) -> &'static str {
        "mpesa"
    }

    fn supported_currencies(&self) -> &[Currency] {
        &MOBILE_CURRENCIES
    }

    async fn create_customer(
        &self,
        _tenant_id: &TenantId,
        _customer_id: &CustomerId,
        _email: &str,
    ) -> Result<CustomerHandle, ProviderError> {
        Ok(CustomerHandle {
            provider_customer_id: self.next("mp_cus"),
        })
    }

    async fn create_payment_intent(
        &self,
        _request: &CreatePaymentIntentRequest,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        // The STK push goes out immediately; settlement arrives by callback.
        let intent = ProviderPaymentIntent {
            external_id: self.next("mp_chk"),
            status: ProviderPaymentStatus::Processing,
            receipt_url: None,
            failure_reason: None,
        };
        self.intents.insert(intent.external_id.clone(), intent.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(
        &self,
        external_id: &str,
        _payment_method: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        self.intents
            .get(external_id)
            .map(|e| e.clone())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("unknown checkout {external_id}"))
            })
    }

    async fn cancel_payment_intent(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        let mut entry = self.intents.get_mut(external_id).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("unknown checkout {external_id}"))
        })?;
        entry.status = ProviderPaymentStatus::Cancelled;
        Ok(entry.clone())
    }

    async fn get_payment_intent_status(
        &self,
        external_id: &str,
    ) -> Result<ProviderPaymentIntent, ProviderError> {
        self.intents
            .get(external_id)
            .map(|e| e.clone())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("unknown checkout {external_id}"))
            })
    }

    async fn refund_payment(
        &self,
        external_id: &str,
        _amount: Money,
        _reason: Option<&str>,
    ) -> Result<RefundOutcome, ProviderError> {
        if !self.intents.contains_key(external_id) {
            return Err(ProviderError::InvalidRequest(format!(
                "unknown checkout {external_id}"
            )));
        }
        Ok(RefundOutcome {
            refund_id: self.next("mp_rev"),
            status: RefundStatus::Succeeded,
        })
    }

    async fn create_transfer(
        &self,
        _request: &TransferRequest,
    ) -> Result<ProviderTransfer, ProviderError> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(
                "B2C queue unavailable".to_string(),
            ));
        }
        let transfer = ProviderTransfer {
            transfer_id: self.next("mp_b2c"),
            status: ProviderTransferStatus::InTransit,
            estimated_arrival: Some(Utc::now() + Duration::days(1)),
            failure_reason: None,
        };
        self.transfers
            .insert(transfer.transfer_id.clone(), transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<ProviderTransfer, ProviderError> {
        self.transfers
            .get(transfer_id)
            .map(|t| t.clone())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("unknown transfer {transfer_id}"))
            })
    }

    async fn list_payment_methods(
        &self,
        _customer: &CustomerHandle,
    ) -> Result<Vec<PaymentMethod>, ProviderError> {
        Err(ProviderError::Unsupported("stored payment methods"))
    }

    async fn attach_payment_method(
        &self,
        _customer: &CustomerHandle,
        _method_id: &str,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("stored payment methods"))
    }

    async fn detach_payment_method(
        &self,
        _customer: &CustomerHandle,
        _method_id: &str,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("stored payment methods"))
    }

    async fn create_connected_account(
        &self,
        _owner_id: &OwnerId,
        _email: &str,
    ) -> Result<ConnectedAccount, ProviderError> {
        Err(ProviderError::Unsupported("connected accounts"))
    }

    async fn create_account_link(
        &self,
        _account: &ConnectedAccount,
        _return_url: &str,
    ) -> Result<AccountLink, ProviderError> {
        Err(ProviderError::Unsupported("connected accounts"))
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), ProviderError> {
        if sha256_hex(&self.webhook_secret, payload) == signature {
            Ok(())
        } else {
            Err(ProviderError::SignatureVerification(
                "mobile-money callback digest mismatch".to_string(),
            ))
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<ProviderWebhookEvent, ProviderError> {
        let parsed: MobileMoneyCallback = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidRequest(format!("bad callback body: {e}")))?;
        Ok(translate_mobile_money_callback(self.name(), &parsed))
    }
}
