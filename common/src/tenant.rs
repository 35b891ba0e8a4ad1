//! Tenant view consumed by the core engines.
//!
//! The tenant service itself lives outside the core; the engines only need
//! the platform-fee percentage and payout settings, looked up through the
//! `TenantDirectory` port. A static in-memory directory ships for tests and
//! single-process wiring.

use async_trait::async_trait;
use chrono::Weekday;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identifiers::TenantId;
use crate::money::{Currency, Money};

/// When scheduled disbursement runs execute for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutSchedule {
    Daily,
    Weekly(Weekday),
    /// Day of month, 1-28.
    Monthly(u8),
}

/// Per-tenant payout policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutSettings {
    /// Owners below this balance are skipped by scheduled runs.
    pub minimum_disbursement: Money,
    /// Fraction of gross income withheld for anticipated expenses,
    /// as a percentage (e.g. `5` for 5%). Zero disables holdback.
    pub holdback_percent: Decimal,
    /// Scheduled run cadence.
    pub schedule: PayoutSchedule,
}

impl PayoutSettings {
    /// Default policy in the given currency: no minimum, no holdback,
    /// monthly on the 1st.
    pub fn defaults(currency: Currency) -> Self {
        Self {
            minimum_disbursement: Money::zero(currency),
            holdback_percent: Decimal::ZERO,
            schedule: PayoutSchedule::Monthly(1),
        }
    }
}

/// The slice of tenant state the payment and disbursement engines read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantView {
    pub tenant_id: TenantId,
    /// Platform fee applied to incoming payments, as a percentage.
    pub platform_fee_percent: Decimal,
    pub payout: PayoutSettings,
}

/// Lookup port for tenant state.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolve the tenant view, or `None` for an unknown tenant.
    async fn get(&self, tenant_id: &TenantId) -> Option<TenantView>;
}

/// In-memory tenant directory for tests and single-process wiring.
#[derive(Default)]
pub struct StaticTenantDirectory {
    tenants: RwLock<HashMap<TenantId, TenantView>>,
}

impl StaticTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tenant view.
    pub fn upsert(&self, view: TenantView) {
        self.tenants.write().insert(view.tenant_id.clone(), view);
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn get(&self, tenant_id: &TenantId) -> Option<TenantView> {
        self.tenants.read().get(tenant_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn directory_round_trip() {
        let dir = StaticTenantDirectory::new();
        let tenant = TenantId::new("tn-acme");
        assert!(dir.get(&tenant).await.is_none());

        dir.upsert(TenantView {
            tenant_id: tenant.clone(),
            platform_fee_percent: dec!(5),
            payout: PayoutSettings::defaults(Currency::KES),
        });

        let view = dir.get(&tenant).await.unwrap();
        assert_eq!(view.platform_fee_percent, dec!(5));
        assert_eq!(view.payout.holdback_percent, Decimal::ZERO);
    }
}
