//! NyumbaPay Platform Composition Root
//!
//! Wires the core engines together over the in-memory stores and sandbox
//! providers: one outbox, one event pipeline, ledger projection subscribers.
//! Production deployments replace the stores and adapters at this seam; the
//! engines themselves are wired identically.

pub mod subscribers;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use nyumbapay_common::{Currency, StaticTenantDirectory, TenantId, TenantView};
use nyumbapay_disburse::{
    DisburseConfig, DisbursementScheduler, DisbursementService, InMemoryDisbursementRepository,
    SchedulerConfig, StaticPayoutDestinations,
};
use nyumbapay_events::{
    FanoutSink, InMemoryOutboxStore, OutboxConfig, OutboxProcessor, OutboxPublisher,
};
use nyumbapay_ledger::{
    Account, AccountRepository, AccountScope, AccountType, InMemoryLedgerStore, LedgerEngine,
    LedgerError,
};
use nyumbapay_payments::{
    CardSandbox, InMemoryPaymentIntentRepository, MpesaSandbox, OrchestratorConfig,
    PaymentOrchestrator, ProviderRegistry, WebhookIngress,
};
use nyumbapay_reconcile::{ReconcileConfig, ReconciliationEngine};
use nyumbapay_statements::{InMemoryStatementRepository, StatementBuilder};

use crate::subscribers::LedgerProjector;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub card_webhook_secret: String,
    pub mpesa_webhook_secret: String,
    pub log_level: String,
    pub outbox: OutboxConfig,
    pub orchestrator: OrchestratorConfig,
    pub disburse: DisburseConfig,
    pub scheduler: SchedulerConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            card_webhook_secret: "whsec_sandbox".to_string(),
            mpesa_webhook_secret: "cbsec_sandbox".to_string(),
            log_level: "info".to_string(),
            outbox: OutboxConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            disburse: DisburseConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("NYUMBAPAY_CARD_WEBHOOK_SECRET") {
            config.card_webhook_secret = secret;
        }
        if let Ok(secret) = std::env::var("NYUMBAPAY_MPESA_WEBHOOK_SECRET") {
            config.mpesa_webhook_secret = secret;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(batch) = std::env::var("NYUMBAPAY_OUTBOX_BATCH_SIZE") {
            if let Ok(batch) = batch.parse() {
                config.outbox.batch_size = batch;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.card_webhook_secret.is_empty() || self.mpesa_webhook_secret.is_empty() {
            return Err("webhook secrets cannot be empty".to_string());
        }
        if self.outbox.batch_size == 0 {
            return Err("outbox batch size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Initialise tracing for the process. Safe to call more than once.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// The wired platform.
pub struct Platform {
    pub config: PlatformConfig,
    pub tenants: Arc<StaticTenantDirectory>,
    pub ledger_store: Arc<InMemoryLedgerStore>,
    pub ledger: Arc<LedgerEngine>,
    pub intents: Arc<InMemoryPaymentIntentRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub card: Arc<CardSandbox>,
    pub mpesa: Arc<MpesaSandbox>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookIngress>,
    pub disbursements: Arc<DisbursementService>,
    pub destinations: Arc<StaticPayoutDestinations>,
    pub scheduler: Arc<DisbursementScheduler>,
    pub statements: Arc<StatementBuilder>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub outbox: Arc<InMemoryOutboxStore>,
    pub processor: Arc<OutboxProcessor>,
}

impl Platform {
    /// Wire everything over the in-memory stores and sandbox providers.
    pub fn new(config: PlatformConfig) -> Self {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let publisher = Arc::new(OutboxPublisher::new(outbox.clone()));

        let ledger_store = Arc::new(InMemoryLedgerStore::new());
        let ledger = Arc::new(LedgerEngine::new(
            ledger_store.clone(),
            ledger_store.clone(),
            publisher.clone(),
        ));

        let registry = Arc::new(ProviderRegistry::new());
        let card = Arc::new(CardSandbox::new(config.card_webhook_secret.clone()));
        let mpesa = Arc::new(MpesaSandbox::new(config.mpesa_webhook_secret.clone()));
        registry.register(card.clone());
        registry.register(mpesa.clone());
        registry.set_default(card.clone());

        let tenants = Arc::new(StaticTenantDirectory::new());
        let intents = Arc::new(InMemoryPaymentIntentRepository::new());
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            intents.clone(),
            registry.clone(),
            tenants.clone(),
            publisher.clone(),
            config.orchestrator.clone(),
        ));
        let webhooks = Arc::new(WebhookIngress::new(orchestrator.clone(), registry.clone()));

        let destinations = Arc::new(StaticPayoutDestinations::new());
        let disbursements = Arc::new(DisbursementService::new(
            Arc::new(InMemoryDisbursementRepository::new()),
            ledger_store.clone(),
            ledger.clone(),
            registry.clone(),
            tenants.clone(),
            publisher.clone(),
            config.disburse.clone(),
        ));
        let scheduler = Arc::new(DisbursementScheduler::new(
            disbursements.clone(),
            destinations.clone(),
            tenants.clone(),
            config.scheduler.clone(),
        ));

        let statements = Arc::new(StatementBuilder::new(
            Arc::new(InMemoryStatementRepository::new()),
            ledger.clone(),
            ledger_store.clone(),
            publisher.clone(),
        ));

        let reconciliation = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            ledger_store.clone(),
            intents.clone(),
            orchestrator.clone(),
            registry.clone(),
            publisher.clone(),
            config.reconcile.clone(),
        ));

        let projector = Arc::new(LedgerProjector::new(
            ledger.clone(),
            ledger_store.clone(),
            ledger_store.clone(),
        ));
        let sink = Arc::new(FanoutSink::new().subscribe(projector));
        let processor = Arc::new(OutboxProcessor::new(
            outbox.clone(),
            sink,
            config.outbox.clone(),
        ));

        Self {
            config,
            tenants,
            ledger_store,
            ledger,
            intents,
            registry,
            card,
            mpesa,
            orchestrator,
            webhooks,
            disbursements,
            destinations,
            scheduler,
            statements,
            reconciliation,
            outbox,
            processor,
        }
    }

    /// Register a tenant and open its platform accounts.
    pub async fn bootstrap_tenant(
        &self,
        view: TenantView,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        let tenant_id = view.tenant_id.clone();
        self.tenants.upsert(view);
        self.ledger_store
            .create(Account::new(
                tenant_id.clone(),
                AccountType::PlatformHolding,
                currency,
            ))
            .await?;
        self.ledger_store
            .create(Account::new(
                tenant_id.clone(),
                AccountType::PlatformRevenue,
                currency,
            ))
            .await?;
        info!(tenant_id = %tenant_id, %currency, "Tenant bootstrapped");
        Ok(())
    }

    /// Open an operating account for a property owner.
    pub async fn open_owner_account(
        &self,
        tenant_id: &TenantId,
        owner_id: nyumbapay_common::OwnerId,
        currency: Currency,
    ) -> Result<Account, LedgerError> {
        let account = Account::new(tenant_id.clone(), AccountType::OwnerOperating, currency)
            .with_scope(AccountScope::Owner(owner_id));
        self.ledger_store.create(account.clone()).await?;
        Ok(account)
    }

    /// Drain the outbox until it is empty or stops making progress.
    /// Event-driven tests call this instead of running the poll loop.
    pub async fn drain_events(&self) {
        for _ in 0..16 {
            let stats = self
                .processor
                .drain_once(nyumbapay_common::now())
                .await
                .unwrap_or_default();
            if stats.published == 0 && stats.failed == 0 && stats.dead_lettered == 0 {
                break;
            }
        }
    }

    /// Spawn the background outbox poller.
    pub fn start_outbox(&self) -> tokio::task::JoinHandle<()> {
        let processor = self.processor.clone();
        tokio::spawn(async move { processor.run_loop().await })
    }
}
