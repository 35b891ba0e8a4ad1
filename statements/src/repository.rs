//! Persistence port for statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use nyumbapay_common::{AccountId, StatementId, TenantId};

use crate::error::StatementError;
use crate::statement::{Statement, StatementType};

/// Statement persistence port. Implementations enforce uniqueness over
/// `(tenant, account, type, period_start, period_end)`.
#[async_trait]
pub trait StatementRepository: Send + Sync {
    async fn insert(&self, statement: Statement) -> Result<(), StatementError>;

    async fn update(&self, statement: &Statement) -> Result<(), StatementError>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &StatementId,
    ) -> Result<Option<Statement>, StatementError>;

    async fn find_for_period(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        statement_type: StatementType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Statement>, StatementError>;
}
