//! NyumbaPay Payment Orchestrator
//!
//! Payment-intent lifecycle across pluggable providers: creation with
//! idempotency, provider routing by currency, webhook ingestion and refunds.
//! Ledger effects of payments are posted by event subscribers, not here.

pub mod error;
pub mod intent;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod repository;
pub mod sandbox;
pub mod webhook;

pub use error::PaymentError;
pub use intent::{PaymentIntent, PaymentStatus, PaymentType};
pub use memory::InMemoryPaymentIntentRepository;
pub use orchestrator::{
    compute_platform_fee, CreatePaymentRequest, OrchestratorConfig, PaymentOrchestrator,
    RefundResult,
};
pub use provider::{
    AccountLink, ConnectedAccount, CreatePaymentIntentRequest, CustomerHandle, PaymentMethod,
    PaymentProvider, ProviderError, ProviderPaymentIntent, ProviderPaymentStatus,
    ProviderRegistry, ProviderTransfer, ProviderTransferStatus, RefundOutcome, RefundStatus,
    TransferRequest,
};
pub use repository::PaymentIntentRepository;
pub use sandbox::{CardSandbox, MpesaSandbox};
pub use webhook::{
    translate_card_event, translate_mobile_money_callback, CardWebhookPayload,
    MobileMoneyCallback, ProviderWebhookEvent, WebhookIngress,
};
